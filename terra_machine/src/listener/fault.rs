//! Fault detector.
//!
//! Wakes while a task or homing run is in progress and scans the
//! safety inputs. Any violation raises the fault flag first, then
//! posts the trigger event, so every running body observes the flag
//! before the state machine reacts.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bitflags::bitflags;
use tracing::error;

use terra_common::time::sleep_for_ms;

use crate::action;
use crate::context::Context;
use crate::guard;
use crate::listener::{Listener, ListenerCore};

bitflags! {
    /// Which unsafe conditions a scan observed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultCause: u8 {
        const E_STOP            = 1 << 0;
        const LIMIT_SWITCH      = 1 << 1;
        const HEIGHT_MISMATCH   = 1 << 2;
        const FINGER_PROTECTION = 1 << 3;
    }
}

/// Scan period while a task is in progress, ms.
const SCAN_PERIOD_MS: u64 = 100;

pub struct FaultListener {
    ctx: Arc<Context>,
    core: ListenerCore,
}

impl FaultListener {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            core: ListenerCore::new(),
        }
    }

    /// One pass over the safety inputs.
    pub fn scan(ctx: &Context) -> FaultCause {
        let mut causes = FaultCause::empty();
        let snapshot = ctx.state.snapshot();

        if guard::e_stop(&ctx.devices) {
            causes |= FaultCause::E_STOP;
        }

        // Limit switches are expected to close while homing.
        if !snapshot.homing && guard::limit_switch_xy(&ctx.devices) {
            causes |= FaultCause::LIMIT_SWITCH;
        }

        if snapshot.spraying.running || snapshot.tending.running {
            if !guard::height_spraying_tending(&ctx.devices) {
                causes |= FaultCause::HEIGHT_MISMATCH;
            }
            if guard::finger_protection(&ctx.devices) {
                causes |= FaultCause::FINGER_PROTECTION;
            }
        }

        if snapshot.cleaning.running && !guard::height_cleaning(&ctx.devices) {
            causes |= FaultCause::HEIGHT_MISMATCH;
        }

        causes
    }
}

impl Listener for FaultListener {
    fn name(&self) -> &'static str {
        "fault-listener"
    }

    fn start(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let alive = self.core.alive_flag();

        self.core.start(self.name(), move || {
            // An axis parks on its switch right after homing, so a
            // closed limit only counts once two consecutive scans see
            // it; everything else trips on the first scan.
            let mut limit_pending = false;

            while alive.load(Ordering::SeqCst) && ctx.state.running() {
                let woke = ctx.state.wait_until(Duration::from_millis(200), |s| {
                    !s.running || s.any_task_running() || s.homing
                });
                let Some(snapshot) = woke else { continue };
                if !alive.load(Ordering::SeqCst) || !snapshot.running {
                    return;
                }

                let mut causes = Self::scan(&ctx);
                if causes.contains(FaultCause::LIMIT_SWITCH) {
                    if !limit_pending {
                        limit_pending = true;
                        causes.remove(FaultCause::LIMIT_SWITCH);
                    }
                } else {
                    limit_pending = false;
                }

                if !causes.is_empty() && !ctx.state.fault() {
                    error!(?causes, "unsafe condition detected");
                    action::raise_fault(&ctx);
                }

                sleep_for_ms(SCAN_PERIOD_MS);
            }
        });
    }

    fn stop(&mut self) {
        self.core.stop(self.name());
    }
}
