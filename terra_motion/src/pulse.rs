//! Step-pulse generation with speed ramps.
//!
//! One engine drives one stepper. A move is a signed step count plus
//! an optional duration budget; the engine emits one pulse per call to
//! [`PulseEngine::next`], pacing itself against an absolute monotonic
//! deadline so jitter never accumulates across a move.
//!
//! Two speed modes:
//!
//! - **Constant**: a fixed inter-pulse delay derived from rpm, or
//!   stretched to fill the duration budget.
//! - **Linear**: trapezoidal ramps computed with the integer
//!   approximation from Atmel application note AVR446. The inter-pulse
//!   delay is refined step by step with a division-remainder carry so
//!   the ramp stays numerically stable without floating point in the
//!   hot path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use terra_common::config::Speed;
use terra_common::time::{micros, sleep_for_us, sleep_until_us};
use terra_hal::gpio::Level;
use terra_hal::stepper::StepperMotor;

/// Shortest time the step pin is held high, µs.
const STEP_HIGH_MIN_US: u64 = 1;

/// Correction factor for the first inter-pulse delay (AVR446).
const C0_CORRECTION: f64 = 0.676;

/// Speed mode selected when the move starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedMode {
    Constant,
    Linear,
}

/// Travel direction of the current move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Ramp phase, derived from the step counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionPhase {
    Stopped,
    Accelerating,
    Cruising,
    Decelerating,
}

/// Cross-thread view of a move in progress.
///
/// The pulse loop owns the engine; other threads cancel through this
/// handle and read the mirrored remaining-step count. The loop
/// observes a cancel at the top of its next iteration.
#[derive(Debug, Default)]
pub struct HaltHandle {
    halt: AtomicBool,
    remaining: AtomicU32,
}

impl HaltHandle {
    /// Request the move to stop; returns the steps still pending.
    pub fn halt(&self) -> u32 {
        self.halt.store(true, Ordering::SeqCst);
        self.remaining.load(Ordering::SeqCst)
    }

    /// Steps still pending in the current move.
    pub fn pending(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    fn requested(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }

    fn arm(&self, remaining: u32) {
        self.halt.store(false, Ordering::SeqCst);
        self.remaining.store(remaining, Ordering::SeqCst);
    }

    fn mirror(&self, remaining: u32) {
        self.remaining.store(remaining, Ordering::SeqCst);
    }
}

/// Pulse generator for one axis.
pub struct PulseEngine {
    motor: Arc<StepperMotor>,
    motor_steps: u32,
    microsteps: u32,
    rpm: f64,
    acceleration: f64,
    deceleration: f64,
    mode: SpeedMode,

    direction: Direction,
    remaining_steps: u32,
    step_count: u32,
    steps_to_cruise: u32,
    steps_to_brake: u32,
    step_pulse_us: u64,
    cruise_step_pulse_us: u64,
    rest: i64,
    last_pulse_end_us: u64,
    next_interval_us: u64,

    shared: Arc<HaltHandle>,
}

impl PulseEngine {
    /// Create an engine in linear mode with a neutral profile.
    pub fn new(motor: Arc<StepperMotor>, motor_steps: u32, microsteps: u32) -> Self {
        Self {
            motor,
            motor_steps,
            microsteps: microsteps.max(1),
            rpm: 60.0,
            acceleration: 1000.0,
            deceleration: 1000.0,
            mode: SpeedMode::Linear,
            direction: Direction::Forward,
            remaining_steps: 0,
            step_count: 0,
            steps_to_cruise: 0,
            steps_to_brake: 0,
            step_pulse_us: 0,
            cruise_step_pulse_us: 0,
            rest: 0,
            last_pulse_end_us: 0,
            next_interval_us: 0,
            shared: Arc::new(HaltHandle::default()),
        }
    }

    /// Cross-thread cancel/progress handle for this engine.
    pub fn halt_handle(&self) -> Arc<HaltHandle> {
        Arc::clone(&self.shared)
    }

    /// Select constant or linear speed for subsequent moves.
    pub fn set_mode(&mut self, mode: SpeedMode) {
        self.mode = mode;
    }

    /// Apply a speed profile entry for subsequent moves.
    pub fn set_profile(&mut self, speed: Speed) {
        self.rpm = speed.rpm;
        self.acceleration = speed.acceleration;
        self.deceleration = speed.deceleration;
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn remaining_steps(&self) -> u32 {
        self.remaining_steps
    }

    #[inline]
    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    #[inline]
    pub fn steps_to_cruise(&self) -> u32 {
        self.steps_to_cruise
    }

    #[inline]
    pub fn steps_to_brake(&self) -> u32 {
        self.steps_to_brake
    }

    #[inline]
    pub fn step_pulse_us(&self) -> u64 {
        self.step_pulse_us
    }

    #[inline]
    pub fn cruise_step_pulse_us(&self) -> u64 {
        self.cruise_step_pulse_us
    }

    /// Ramp phase derived from the counters.
    pub fn phase(&self) -> MotionPhase {
        if self.remaining_steps == 0 {
            return MotionPhase::Stopped;
        }
        match self.mode {
            SpeedMode::Constant => MotionPhase::Cruising,
            SpeedMode::Linear => {
                if self.remaining_steps <= self.steps_to_brake {
                    MotionPhase::Decelerating
                } else if self.step_count <= self.steps_to_cruise {
                    MotionPhase::Accelerating
                } else {
                    MotionPhase::Cruising
                }
            }
        }
    }

    /// Fixed inter-pulse delay for a given rpm, µs.
    ///
    /// 60 s/min · 10⁶ µs/s / (motor steps · microsteps · rpm), with
    /// integer truncation.
    pub fn calc_step_pulse_from_rpm(motor_steps: u32, microsteps: u32, rpm: f64) -> u64 {
        (60.0 * 1_000_000.0 / motor_steps as f64 / microsteps as f64 / rpm) as u64
    }

    /// Initialise a move of `steps` microsteps.
    ///
    /// Negative counts run backward. A positive `deadline_us` stretches
    /// or re-plans the move so it fits the budget; zero means "as fast
    /// as the profile allows". `steps == 0` arms nothing.
    pub fn start_move(&mut self, steps: i64, deadline_us: u64) {
        self.pre_start_move(steps);
        if self.remaining_steps == 0 {
            self.shared.mirror(0);
            return;
        }

        match self.mode {
            SpeedMode::Constant => self.plan_constant(deadline_us),
            SpeedMode::Linear => self.plan_linear(deadline_us),
        }
        self.shared.arm(self.remaining_steps);
    }

    fn pre_start_move(&mut self, steps: i64) {
        self.direction = if steps >= 0 {
            Direction::Forward
        } else {
            Direction::Backward
        };
        self.last_pulse_end_us = 0;
        self.next_interval_us = 0;
        self.remaining_steps = steps.unsigned_abs().min(u32::MAX as u64) as u32;
        self.step_count = 0;
        self.rest = 0;
    }

    fn plan_constant(&mut self, deadline_us: u64) {
        self.steps_to_cruise = 0;
        self.steps_to_brake = 0;
        self.step_pulse_us =
            Self::calc_step_pulse_from_rpm(self.motor_steps, self.microsteps, self.rpm);
        self.cruise_step_pulse_us = self.step_pulse_us;
        if deadline_us > self.remaining_steps as u64 * self.step_pulse_us {
            self.step_pulse_us = deadline_us / self.remaining_steps as u64;
        }
    }

    fn plan_linear(&mut self, deadline_us: u64) {
        // Target speed in full steps per second.
        let mut speed = self.rpm * self.motor_steps as f64 / 60.0;

        if deadline_us > 0 {
            // Largest cruise speed that still finishes inside the
            // budget: t = d/(µ·v) + v/(2a₁) + v/(2a₂), solved for v.
            let t = deadline_us as f64 / 1e6;
            let d = self.remaining_steps as f64 / self.microsteps as f64;
            let a2 = 1.0 / self.acceleration + 1.0 / self.deceleration;
            let discriminant = t * t - 2.0 * a2 * d;
            if discriminant >= 0.0 {
                speed = speed.min((t - discriminant.sqrt()) / a2);
            }
        }

        // Microsteps spent ramping up to the cruise speed, and back down.
        self.steps_to_cruise =
            (self.microsteps as f64 * speed * speed / (2.0 * self.acceleration)) as u32;
        self.steps_to_brake =
            (self.steps_to_cruise as f64 * self.acceleration / self.deceleration) as u32;
        if self.remaining_steps < self.steps_to_cruise + self.steps_to_brake {
            // Cruise speed is unreachable; split the triangle.
            self.steps_to_cruise = (self.remaining_steps as f64 * self.deceleration
                / (self.acceleration + self.deceleration)) as u32;
            self.steps_to_brake = self.remaining_steps - self.steps_to_cruise;
        }

        // First delay c0, with the AVR446 correction factor.
        self.step_pulse_us = (1e6
            * C0_CORRECTION
            * (2.0 / self.acceleration / self.microsteps as f64).sqrt())
            as u64;
        // The recurrence only approaches the target; the cruise delay
        // is pinned once the ramp ends.
        self.cruise_step_pulse_us = (1e6 / speed / self.microsteps as f64) as u64;
    }

    /// Account one emitted step and refine the inter-pulse delay.
    fn calc_step_pulse(&mut self) {
        if self.remaining_steps == 0 {
            return;
        }

        self.remaining_steps -= 1;
        self.step_count += 1;

        if self.mode == SpeedMode::Constant {
            return;
        }

        match self.phase() {
            MotionPhase::Accelerating => {
                if self.step_count < self.steps_to_cruise {
                    let pulse = self.step_pulse_us as i64;
                    let divisor = 4 * self.step_count as i64 + 1;
                    let numerator = 2 * pulse + self.rest;
                    self.step_pulse_us = (pulse - numerator / divisor).max(1) as u64;
                    self.rest = numerator % divisor;
                } else {
                    self.step_pulse_us = self.cruise_step_pulse_us;
                    self.rest = 0;
                }
            }
            MotionPhase::Decelerating => {
                let pulse = self.step_pulse_us as i64;
                let divisor = -4 * self.remaining_steps as i64 + 1;
                let numerator = 2 * pulse + self.rest;
                self.step_pulse_us = (pulse - numerator / divisor).max(1) as u64;
                self.rest = numerator % divisor;
            }
            _ => {}
        }
    }

    /// Consume one step of the plan without touching the pins.
    ///
    /// Returns the delay the emitted pulse should occupy, or 0 when
    /// the move is finished. Timing-only callers (tests, duration
    /// estimation, benchmarks) drive the plan with this.
    pub fn tick(&mut self) -> u64 {
        if self.remaining_steps == 0 {
            return 0;
        }
        let pulse = self.step_pulse_us;
        self.calc_step_pulse();
        self.shared.mirror(self.remaining_steps);
        pulse
    }

    /// Emit one pulse.
    ///
    /// Sleeps until the previous pulse's interval has elapsed, applies
    /// the direction, raises the step pin for at least 1 µs, lowers
    /// it, and returns the microseconds until the next call is due.
    /// Returns 0 once the move is complete, when `stop` reports true,
    /// or when the halt handle fired; the pending steps are dropped.
    pub fn next(&mut self, stop: &dyn Fn() -> bool) -> u64 {
        if self.shared.requested() || stop() {
            self.remaining_steps = 0;
            self.shared.mirror(0);
        }

        if self.remaining_steps == 0 {
            self.last_pulse_end_us = 0;
            self.next_interval_us = 0;
            return 0;
        }

        if self.last_pulse_end_us > 0 && self.next_interval_us > 0 {
            sleep_until_us(self.last_pulse_end_us + self.next_interval_us);
        }

        // The direction pin is sampled on the rising step edge, so it
        // is written first and settles during the high time.
        let dir_level = match self.direction {
            Direction::Forward => Level::High,
            Direction::Backward => Level::Low,
        };
        if self.motor.direction(dir_level).is_err() {
            self.remaining_steps = 0;
            self.shared.mirror(0);
            return 0;
        }

        let started = micros();
        if self.motor.step(Level::High).is_err() {
            self.remaining_steps = 0;
            self.shared.mirror(0);
            return 0;
        }

        let pulse = self.tick();

        sleep_for_us(STEP_HIGH_MIN_US);
        let _ = self.motor.step(Level::Low);

        // The computation and high time eat into the delay; what is
        // left is the wait before the next rising edge.
        self.last_pulse_end_us = micros();
        let elapsed = self.last_pulse_end_us - started;
        self.next_interval_us = if pulse > elapsed { pulse - elapsed } else { 1 };
        self.next_interval_us
    }

    /// Force the move to end; returns the steps that were pending.
    pub fn stop(&mut self) -> u32 {
        let pending = self.remaining_steps;
        self.remaining_steps = 0;
        self.shared.mirror(0);
        pending
    }

    /// Estimated duration of a move of `steps`, µs.
    ///
    /// Re-plans the engine for the probe, so only call it between
    /// moves.
    pub fn time_for_move(&mut self, steps: i64) -> u64 {
        if steps == 0 {
            return 0;
        }

        match self.mode {
            SpeedMode::Constant => {
                steps.unsigned_abs()
                    * Self::calc_step_pulse_from_rpm(self.motor_steps, self.microsteps, self.rpm)
            }
            SpeedMode::Linear => {
                self.start_move(steps, 0);
                // Whether the profile speed is actually reached; the
                // planner collapses short moves into a triangle.
                let speed = self.rpm * self.motor_steps as f64 / 60.0;
                let full_cruise =
                    self.microsteps as f64 * speed * speed / (2.0 * self.acceleration);
                let full_brake = full_cruise * self.acceleration / self.deceleration;
                let seconds = if steps.unsigned_abs() as f64 >= full_cruise + full_brake {
                    steps.unsigned_abs() as f64 / (self.microsteps as f64 * speed)
                        + speed / (2.0 * self.acceleration)
                        + speed / (2.0 * self.deceleration)
                } else {
                    (2.0 * self.steps_to_cruise as f64
                        / self.acceleration
                        / self.microsteps as f64)
                        .sqrt()
                        + (2.0 * self.steps_to_brake as f64
                            / self.deceleration
                            / self.microsteps as f64)
                            .sqrt()
                };
                self.stop();
                (seconds * 1e6).round() as u64
            }
        }
    }
}
