//! Homing watchdog.
//!
//! Starts timing whenever the homing flag goes up; if it is still up
//! after the configured bound, the run is declared stuck and faulted.
//! A stuck pulse never times out on its own, so this watchdog is the
//! only bound on a blocked axis.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{error, info};

use terra_common::time::{millis, sleep_for_ms};
use terra_common::types::TaskKind;

use crate::action;
use crate::context::Context;
use crate::listener::{Listener, ListenerCore};

pub struct TaskTimeoutListener {
    ctx: Arc<Context>,
    core: ListenerCore,
}

impl TaskTimeoutListener {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            core: ListenerCore::new(),
        }
    }
}

impl Listener for TaskTimeoutListener {
    fn name(&self) -> &'static str {
        "task-timeout-listener"
    }

    fn start(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let alive = self.core.alive_flag();
        let timeout_ms = ctx.config.general.timeout * 1_000;

        self.core.start(self.name(), move || {
            while alive.load(Ordering::SeqCst) && ctx.state.running() {
                let woke = ctx
                    .state
                    .wait_until(Duration::from_millis(200), |s| !s.running || s.homing);
                let Some(snapshot) = woke else { continue };
                if !alive.load(Ordering::SeqCst) || !snapshot.running {
                    return;
                }
                if !snapshot.homing {
                    continue;
                }

                let started = millis();
                loop {
                    if !alive.load(Ordering::SeqCst) || !ctx.state.running() {
                        return;
                    }
                    if !ctx.state.homing() {
                        info!(
                            seconds = (millis() - started) / 1_000,
                            "homing finished in time"
                        );
                        break;
                    }
                    if millis() - started > timeout_ms {
                        error!("timeout while homing");
                        let snapshot = ctx.state.snapshot();
                        for kind in [TaskKind::Spraying, TaskKind::Tending, TaskKind::Cleaning] {
                            if snapshot.task(kind).running {
                                error!("last task: {kind}");
                            }
                        }
                        ctx.state.set_homing(false);
                        action::raise_fault(&ctx);
                        break;
                    }
                    sleep_for_ms(50);
                }
            }
        });
    }

    fn stop(&mut self) {
        self.core.stop(self.name());
    }
}
