//! Liquid-exchange scheduler, one instance per tank.
//!
//! A due date check marks the tank as requested once the scheduled
//! time passes; the exchange itself only runs while the machine is
//! idle. A cancelled exchange keeps the request so it retries at the
//! next idle window.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::warn;

use terra_common::time::epoch_secs;
use terra_common::types::Liquid;

use crate::context::Context;
use crate::liquid::LiquidRefilling;
use crate::listener::{Listener, ListenerCore};

pub struct RefillListener {
    ctx: Arc<Context>,
    liquid: Liquid,
    refilling: Arc<LiquidRefilling>,
    core: ListenerCore,
}

impl RefillListener {
    pub fn new(ctx: Arc<Context>, liquid: Liquid, refilling: Arc<LiquidRefilling>) -> Self {
        Self {
            ctx,
            liquid,
            refilling,
            core: ListenerCore::new(),
        }
    }

    /// Mark the tank requested once its scheduled time has passed.
    pub fn check_schedule(ctx: &Context, liquid: Liquid) {
        let refill = ctx.state.refill(liquid);
        if refill.next_executed > 0 && epoch_secs() > refill.next_executed && !refill.requested {
            ctx.state.set_refill_requested(liquid, true);
        }
    }
}

impl Listener for RefillListener {
    fn name(&self) -> &'static str {
        match self.liquid {
            Liquid::Water => "water-refill-listener",
            Liquid::Disinfectant => "disinfectant-refill-listener",
        }
    }

    fn start(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let liquid = self.liquid;
        let refilling = Arc::clone(&self.refilling);
        let alive = self.core.alive_flag();
        let period = match liquid {
            Liquid::Water => ctx.config.refilling.water.period,
            Liquid::Disinfectant => ctx.config.refilling.disinfectant.period,
        };

        self.core.start(self.name(), move || {
            while alive.load(Ordering::SeqCst) && ctx.state.running() {
                Self::check_schedule(&ctx, liquid);

                let woke = ctx.state.wait_until(Duration::from_millis(500), |s| {
                    let refill = s.refill(liquid);
                    !s.running
                        || (refill.requested
                            && !refill.running
                            && !s.fault
                            && !s.homing
                            && !s.any_task_running())
                });
                let Some(snapshot) = woke else { continue };
                if !alive.load(Ordering::SeqCst) || !snapshot.running {
                    return;
                }

                ctx.state.set_refill_requested(liquid, false);
                ctx.state.set_refill_running(liquid, true);
                let result = refilling.exchange(liquid);
                ctx.state.set_refill_running(liquid, false);

                match result {
                    Ok(()) => {
                        ctx.state.mark_refill_executed(liquid, epoch_secs(), period);
                    }
                    Err(error) => {
                        warn!(%liquid, %error, "exchange did not finish, keeping request");
                        ctx.state.set_refill_requested(liquid, true);
                    }
                }
            }
        });
    }

    fn stop(&mut self) {
        self.core.stop(self.name());
    }
}
