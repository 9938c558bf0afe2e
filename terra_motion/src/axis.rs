//! One linear axis: stepper, pulse engine and limit switch.
//!
//! The engine is locked by whichever worker runs the move; other
//! threads cancel through the shared halt handle, which the pulse loop
//! observes at the top of its next iteration.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use terra_common::config::{Speed, SpeedProfile};
use terra_common::types::AxisId;
use terra_hal::gpio::DigitalInput;
use terra_hal::stepper::StepperMotor;

use crate::error::MotionError;
use crate::pulse::{HaltHandle, PulseEngine};

/// Travel envelope used for homing seeks, mm. Longer than any axis on
/// the machine, so the seek only ends at the switch or on fault.
const HOMING_ENVELOPE_MM: f64 = 2_000.0;

/// Back-off from the switch between the fast and slow seek, mm.
const HOMING_BACKOFF_MM: f64 = 5.0;

/// One axis of the gantry.
pub struct Axis {
    id: AxisId,
    motor: Arc<StepperMotor>,
    limit: Arc<dyn DigitalInput>,
    steps_per_mm: u32,
    engine: Mutex<PulseEngine>,
    halt: Arc<HaltHandle>,
}

impl Axis {
    pub fn new(
        id: AxisId,
        motor: Arc<StepperMotor>,
        limit: Arc<dyn DigitalInput>,
        steps_per_mm: u32,
        engine: PulseEngine,
    ) -> Self {
        let halt = engine.halt_handle();
        Self {
            id,
            motor,
            limit,
            steps_per_mm,
            engine: Mutex::new(engine),
            halt,
        }
    }

    #[inline]
    pub fn id(&self) -> AxisId {
        self.id
    }

    #[inline]
    pub fn steps_per_mm(&self) -> u32 {
        self.steps_per_mm
    }

    /// Microsteps for a length in millimetres, rounded.
    pub fn steps_from_mm(&self, mm: f64) -> i64 {
        (mm * self.steps_per_mm as f64).round() as i64
    }

    /// Whether the axis can answer its sensors.
    pub fn ready(&self) -> bool {
        self.limit.read_bool().is_some()
    }

    /// Whether the limit switch is currently closed.
    pub fn limit_active(&self) -> bool {
        self.limit.is_active()
    }

    /// Steps still pending in the current move.
    pub fn pending_steps(&self) -> u32 {
        self.halt.pending()
    }

    pub fn enable(&self) -> Result<(), MotionError> {
        self.motor.enable().map_err(MotionError::from)
    }

    pub fn disable(&self) -> Result<(), MotionError> {
        self.motor.disable().map_err(MotionError::from)
    }

    /// Apply one speed-profile entry to subsequent moves.
    pub fn set_speed(&self, speed: Speed) {
        self.engine.lock().set_profile(speed);
    }

    /// Cancel the move in flight; returns the steps that were pending.
    pub fn stop(&self) -> u32 {
        self.halt.halt()
    }

    /// Estimated duration of a move, µs.
    pub fn time_for_steps(&self, steps: i64) -> u64 {
        self.engine.lock().time_for_move(steps)
    }

    /// Run a move of `steps` microsteps to completion.
    ///
    /// Blocks the calling worker for the duration. Returns the steps
    /// left undone, which is 0 unless `stop` or the halt handle fired.
    pub fn move_steps(&self, steps: i64, deadline_us: u64, stop: &dyn Fn() -> bool) -> u32 {
        let mut engine = self.engine.lock();
        engine.start_move(steps, deadline_us);
        while engine.next(stop) > 0 {}
        let pending = engine.remaining_steps();
        if pending > 0 {
            debug!(axis = %self.id, pending, "move interrupted");
        }
        pending
    }

    /// Move a length in millimetres; sign selects the direction.
    pub fn move_mm(&self, mm: f64, deadline_us: u64, stop: &dyn Fn() -> bool) -> u32 {
        self.move_steps(self.steps_from_mm(mm), deadline_us, stop)
    }

    /// Establish the axis zero against its limit switch.
    ///
    /// Seeks toward the switch at the profile's normal speed, backs
    /// off a few millimetres, then approaches again slowly until the
    /// switch closes. The engine is left at the slow setting; callers
    /// re-apply a task profile before the next move.
    pub fn home(&self, profile: &SpeedProfile, stop: &dyn Fn() -> bool) -> Result<(), MotionError> {
        self.enable()?;

        let toward = -self.steps_from_mm(HOMING_ENVELOPE_MM);

        // Fast seek until the switch closes.
        if !self.limit_active() {
            self.set_speed(profile.normal.axis(self.id));
            self.move_steps(toward, 0, &|| stop() || self.limit.is_active());
            if stop() {
                return Err(MotionError::Cancelled);
            }
            if !self.limit_active() {
                return Err(MotionError::LimitNotReached(self.id));
            }
        }

        // Back off, then creep in for a repeatable trip point.
        self.set_speed(profile.normal.axis(self.id));
        self.move_mm(HOMING_BACKOFF_MM, 0, stop);
        if stop() {
            return Err(MotionError::Cancelled);
        }

        self.set_speed(profile.slow.axis(self.id));
        self.move_steps(toward, 0, &|| stop() || self.limit.is_active());
        if stop() {
            return Err(MotionError::Cancelled);
        }
        if !self.limit_active() {
            return Err(MotionError::LimitNotReached(self.id));
        }

        debug!(axis = %self.id, "homed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use terra_common::config::AxisSpeeds;
    use terra_hal::backend::Backend;
    use terra_hal::sim::SimBackend;

    fn fast_speed() -> Speed {
        Speed {
            rpm: 6_000.0,
            acceleration: 100_000.0,
            deceleration: 100_000.0,
        }
    }

    fn fast_profile() -> SpeedProfile {
        let speeds = AxisSpeeds {
            x: fast_speed(),
            y: fast_speed(),
            z: fast_speed(),
        };
        SpeedProfile {
            slow: speeds,
            normal: speeds,
            fast: speeds,
        }
    }

    fn axis(backend: &SimBackend) -> Axis {
        let motor = Arc::new(StepperMotor::new(
            backend.digital_output("x-step"),
            backend.digital_output("x-dir"),
            backend.digital_output("x-enable"),
            None,
        ));
        let engine = PulseEngine::new(Arc::clone(&motor), 200, 1);
        let axis = Axis::new(
            AxisId::X,
            motor,
            backend.digital_input("limit-switch-x", false),
            10,
            engine,
        );
        axis.set_speed(fast_speed());
        axis
    }

    #[test]
    fn mm_conversion_rounds_to_steps() {
        let backend = SimBackend::new();
        let axis = axis(&backend);
        assert_eq!(axis.steps_from_mm(10.0), 100);
        assert_eq!(axis.steps_from_mm(-2.55), -26);
        assert_eq!(axis.steps_from_mm(0.0), 0);
    }

    #[test]
    fn move_runs_to_completion() {
        let backend = SimBackend::new();
        let axis = axis(&backend);
        let pending = axis.move_steps(40, 0, &|| false);
        assert_eq!(pending, 0);
        assert_eq!(backend.rising_edges("x-step"), 40);
    }

    #[test]
    fn stop_cancels_from_another_thread() {
        let backend = SimBackend::new();
        let axis = Arc::new(axis(&backend));
        // Slow enough that the move outlives the canceller.
        axis.set_speed(Speed {
            rpm: 30.0,
            acceleration: 1000.0,
            deceleration: 1000.0,
        });

        let mover = Arc::clone(&axis);
        let handle = std::thread::spawn(move || mover.move_steps(100_000, 0, &|| false));

        std::thread::sleep(std::time::Duration::from_millis(50));
        let pending = axis.stop();
        assert!(pending > 0);
        let left = handle.join().expect("mover thread");
        assert_eq!(left, 0);
        assert!(backend.rising_edges("x-step") < 100_000);
    }

    #[test]
    fn homing_seeks_backs_off_and_reseeks() {
        let backend = SimBackend::new();
        let axis = axis(&backend);

        // Close the switch after a handful of pulses, reopen it while
        // the axis backs away, close it again on the slow approach.
        let edges = Arc::new(AtomicU32::new(0));
        let watcher = {
            let backend = backend.clone();
            let edges = Arc::clone(&edges);
            std::thread::spawn(move || {
                loop {
                    let seen = backend.rising_edges("x-step") as u32;
                    edges.store(seen, Ordering::SeqCst);
                    match seen {
                        0..=20 => backend.set_input("limit-switch-x", false),
                        21..=70 => backend.set_input("limit-switch-x", true),
                        71..=120 => backend.set_input("limit-switch-x", false),
                        _ => {
                            backend.set_input("limit-switch-x", true);
                            break;
                        }
                    }
                    std::thread::sleep(std::time::Duration::from_micros(200));
                }
            })
        };

        let result = axis.home(&fast_profile(), &|| false);
        watcher.join().expect("watcher");
        assert!(result.is_ok());
        assert!(axis.limit_active());
    }

    #[test]
    fn homing_from_home_is_a_short_cycle() {
        let backend = SimBackend::new();
        let axis = axis(&backend);
        backend.set_input("limit-switch-x", true);

        // Already at the switch: one back-off plus one slow approach.
        let result = axis.home(&fast_profile(), &|| false);
        assert!(result.is_ok());
        // Back-off is 5 mm at 10 steps/mm; the re-seek stops at the
        // first pulse because the switch still reads closed.
        let edges = backend.rising_edges("x-step");
        assert!(edges <= 60, "took {edges} edges");
    }

    #[test]
    fn homing_cancelled_by_stop_signal() {
        let backend = SimBackend::new();
        let axis = axis(&backend);
        let result = axis.home(&fast_profile(), &|| true);
        assert!(matches!(result, Err(MotionError::Cancelled)));
    }
}
