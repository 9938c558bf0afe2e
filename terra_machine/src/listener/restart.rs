//! Restart-from-fault listener.
//!
//! Sleeps until the fault flag goes up, then polls the physical reset
//! button. Recovery clears the homing and fault flags before the
//! restart event is posted, so the state machine re-enters `no_task`
//! with a clean slate and re-homes on entry.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::info;

use terra_common::time::sleep_for_ms;

use crate::context::Context;
use crate::event::Event;
use crate::guard;
use crate::listener::{Listener, ListenerCore};

/// Reset-button poll period, ms.
const POLL_PERIOD_MS: u64 = 50;

pub struct RestartFaultListener {
    ctx: Arc<Context>,
    core: ListenerCore,
}

impl RestartFaultListener {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            core: ListenerCore::new(),
        }
    }
}

impl Listener for RestartFaultListener {
    fn name(&self) -> &'static str {
        "restart-fault-listener"
    }

    fn start(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let alive = self.core.alive_flag();

        self.core.start(self.name(), move || {
            while alive.load(Ordering::SeqCst) && ctx.state.running() {
                let woke = ctx
                    .state
                    .wait_until(Duration::from_millis(200), |s| !s.running || s.fault);
                let Some(snapshot) = woke else { continue };
                if !alive.load(Ordering::SeqCst) || !snapshot.running {
                    return;
                }
                if !snapshot.fault {
                    continue;
                }

                loop {
                    if !alive.load(Ordering::SeqCst) || !ctx.state.running() {
                        return;
                    }
                    if !ctx.state.fault() {
                        // Another path already recovered.
                        break;
                    }
                    if guard::reset(&ctx.devices) {
                        info!("reset pressed, restarting from fault");
                        ctx.state.set_homing(false);
                        ctx.state.set_fault(false);
                        ctx.sink.post(Event::FaultRestart);
                        break;
                    }
                    sleep_for_ms(POLL_PERIOD_MS);
                }
            }
        });
    }

    fn stop(&mut self) {
        self.core.stop(self.name());
    }
}
