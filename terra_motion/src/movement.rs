//! Three-axis movement coordinator.
//!
//! Translates millimetre commands into per-axis step moves dispatched
//! over the worker pool, so the axes run simultaneously and the call
//! returns once all of them report done. Per-axis duration estimates
//! feed a common deadline, which makes axes of different travel finish
//! together instead of the short ones snapping ahead.
//!
//! Only one high-level command is in flight at a time; re-entrant
//! calls fail fast with [`MotionError::Busy`]. Long sequences check
//! the fault flag between waypoints and abandon the rest of the
//! command when it trips.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use tracing::{debug, info};

use terra_common::config::Config;
use terra_common::state::SharedState;
use terra_common::types::{AxisId, Coordinate, LengthUnit, Phase, SpeedBand};
use terra_hal::DeviceError;
use terra_hal::gpio::{DigitalInput, Level, Pwm};
use terra_hal::stepper::StepperMotor;

use crate::axis::Axis;
use crate::error::MotionError;
use crate::pool::WorkerPool;
use crate::pulse::PulseEngine;

/// Coordinated gantry movement over three axes.
pub struct Movement {
    config: Arc<Config>,
    state: Arc<SharedState>,
    x: Arc<Axis>,
    y: Arc<Axis>,
    z: Arc<Axis>,
    finger: Arc<dyn Pwm>,
    pool: WorkerPool,
    busy: AtomicBool,
    command_total_steps: AtomicU64,
}

/// Clears the busy flag when the command finishes.
struct CommandGuard<'a>(&'a AtomicBool);

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Movement {
    /// Start assembling a movement mechanism.
    pub fn builder(config: Arc<Config>, state: Arc<SharedState>) -> MovementBuilder {
        MovementBuilder {
            config,
            state,
            x: None,
            y: None,
            z: None,
            finger: None,
        }
    }

    fn axis(&self, id: AxisId) -> &Arc<Axis> {
        match id {
            AxisId::X => &self.x,
            AxisId::Y => &self.y,
            AxisId::Z => &self.z,
        }
    }

    /// Whether every axis can answer its sensors.
    pub fn active(&self) -> bool {
        AxisId::ALL.iter().all(|&id| self.axis(id).ready())
    }

    /// Completed fraction of the command in flight, 0.0 to 1.0.
    pub fn progress(&self) -> f64 {
        let total = self.command_total_steps.load(Ordering::SeqCst);
        if total == 0 {
            return 1.0;
        }
        let pending: u64 = AxisId::ALL
            .iter()
            .map(|&id| self.axis(id).pending_steps() as u64)
            .sum();
        1.0 - pending.min(total) as f64 / total as f64
    }

    /// Apply a phase profile band to all three axes.
    pub fn set_profile(&self, phase: Phase, band: SpeedBand) {
        let speeds = self.config.speed_profile(phase).band(band);
        for id in AxisId::ALL {
            self.axis(id).set_speed(speeds.axis(id));
        }
    }

    fn begin_command(&self) -> Result<CommandGuard<'_>, MotionError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(MotionError::Busy);
        }
        Ok(CommandGuard(&self.busy))
    }

    fn cancelled(&self) -> bool {
        self.state.fault() || !self.state.running()
    }

    /// Relative move of all three axes at once.
    pub fn move_by(
        &self,
        dx: f64,
        dy: f64,
        dz: f64,
        unit: LengthUnit,
    ) -> Result<(), MotionError> {
        let _guard = self.begin_command()?;
        self.move_by_inner(dx, dy, dz, unit)
    }

    /// Manual jog: like [`Movement::move_by`], but keeps moving while
    /// the fault flag is up. Operator recovery inside fault depends on
    /// this; only a shutdown stops a jog early.
    pub fn jog(&self, dx: f64, dy: f64, dz: f64, unit: LengthUnit) -> Result<(), MotionError> {
        let _guard = self.begin_command()?;
        self.dispatch(dx, dy, dz, unit, true)
    }

    fn move_by_inner(
        &self,
        dx: f64,
        dy: f64,
        dz: f64,
        unit: LengthUnit,
    ) -> Result<(), MotionError> {
        self.dispatch(dx, dy, dz, unit, false)
    }

    fn dispatch(
        &self,
        dx: f64,
        dy: f64,
        dz: f64,
        unit: LengthUnit,
        during_fault: bool,
    ) -> Result<(), MotionError> {
        let factor = unit.to_mm();
        let deltas = [dx * factor, dy * factor, dz * factor];
        let steps: Vec<i64> = AxisId::ALL
            .iter()
            .zip(deltas)
            .map(|(&id, mm)| self.axis(id).steps_from_mm(mm))
            .collect();

        if steps.iter().all(|&s| s == 0) {
            return Ok(());
        }

        // One deadline for all axes: the slowest axis sets the pace.
        let deadline_us = AxisId::ALL
            .iter()
            .zip(&steps)
            .map(|(&id, &s)| self.axis(id).time_for_steps(s))
            .max()
            .unwrap_or(0);

        self.command_total_steps.store(
            steps.iter().map(|s| s.unsigned_abs()).sum(),
            Ordering::SeqCst,
        );

        let mut waits = Vec::with_capacity(3);
        let mut executed = Vec::with_capacity(3);
        for (&id, &axis_steps) in AxisId::ALL.iter().zip(&steps) {
            if axis_steps == 0 {
                continue;
            }
            let axis = Arc::clone(self.axis(id));
            let state = Arc::clone(&self.state);
            let done = Arc::new(AtomicU32::new(0));
            let pending = Arc::clone(&done);
            waits.push(self.pool.execute(move || {
                let left = axis.move_steps(axis_steps, deadline_us, &|| {
                    (!during_fault && state.fault()) || !state.running()
                });
                pending.store(left, Ordering::SeqCst);
            }));
            executed.push((id, axis_steps, done));
        }
        for handle in &waits {
            handle.wait();
        }

        // Book the distance actually travelled, even for a move that
        // was cancelled part-way.
        let mut actual = Coordinate::ORIGIN;
        for (id, commanded, pending) in &executed {
            let left = pending.load(Ordering::SeqCst) as i64;
            let travelled = (commanded.abs() - left) * commanded.signum();
            let mm = travelled as f64 / self.axis(*id).steps_per_mm() as f64;
            match id {
                AxisId::X => actual.x = mm,
                AxisId::Y => actual.y = mm,
                AxisId::Z => actual.z = mm,
            }
        }
        self.state.offset_coordinate(actual);

        if !self.state.running() || (!during_fault && self.state.fault()) {
            return Err(MotionError::Cancelled);
        }
        Ok(())
    }

    /// Absolute move to a target position in millimetres.
    pub fn move_to(&self, target: Coordinate) -> Result<(), MotionError> {
        let _guard = self.begin_command()?;
        self.move_to_inner(target)
    }

    fn move_to_inner(&self, target: Coordinate) -> Result<(), MotionError> {
        let delta = target - self.state.coordinate();
        self.move_by_inner(delta.x, delta.y, delta.z, LengthUnit::Mm)
    }

    /// Move to the configured spraying start position.
    pub fn move_to_spraying_position(&self) -> Result<(), MotionError> {
        let _guard = self.begin_command()?;
        self.move_to_inner(self.config.mechanisms.spraying.position)
    }

    /// Move to the configured tending start position.
    pub fn move_to_tending_position(&self) -> Result<(), MotionError> {
        let _guard = self.begin_command()?;
        self.move_to_inner(self.config.mechanisms.tending.position)
    }

    fn follow_path(&self, waypoints: &[Coordinate]) -> Result<(), MotionError> {
        let _guard = self.begin_command()?;
        for waypoint in waypoints {
            if self.cancelled() {
                return Err(MotionError::Cancelled);
            }
            self.move_by_inner(waypoint.x, waypoint.y, waypoint.z, LengthUnit::Mm)?;
        }
        Ok(())
    }

    /// Follow the spraying waypoints.
    pub fn follow_spraying_paths(&self) -> Result<(), MotionError> {
        self.follow_path(&self.config.mechanisms.spraying.path)
    }

    /// Follow the tending edge waypoints.
    pub fn follow_tending_paths_edge(&self) -> Result<(), MotionError> {
        self.follow_path(&self.config.mechanisms.tending.path.edge)
    }

    /// Follow the tending zigzag waypoints.
    pub fn follow_tending_paths_zigzag(&self) -> Result<(), MotionError> {
        self.follow_path(&self.config.mechanisms.tending.path.zigzag)
    }

    /// Re-establish machine zero.
    ///
    /// Z first so the finger is clear of the tray, then X and Y
    /// together. The homing flag is up for the whole sequence so the
    /// task watchdog can bound it.
    pub fn homing(&self) -> Result<(), MotionError> {
        let _guard = self.begin_command()?;
        self.state.set_homing(true);
        info!("homing all axes");

        let result = self.homing_inner();
        self.state.set_homing(false);
        if result.is_ok() {
            self.state.reset_coordinate();
        }
        result
    }

    fn homing_inner(&self) -> Result<(), MotionError> {
        let profile = self.config.speed_profile(Phase::Homing);

        let state = Arc::clone(&self.state);
        let stop = move || state.fault() || !state.running();

        self.z.home(profile, &stop)?;

        let mut outcomes = Vec::with_capacity(2);
        let mut waits = Vec::with_capacity(2);
        for id in [AxisId::X, AxisId::Y] {
            let axis = Arc::clone(self.axis(id));
            let profile = *profile;
            let state = Arc::clone(&self.state);
            let slot = Arc::new(parking_lot::Mutex::new(None));
            let out = Arc::clone(&slot);
            waits.push(self.pool.execute(move || {
                let result = axis.home(&profile, &|| state.fault() || !state.running());
                *out.lock() = Some(result);
            }));
            outcomes.push(slot);
        }
        for handle in &waits {
            handle.wait();
        }
        for slot in outcomes {
            slot.lock().take().unwrap_or(Err(MotionError::Cancelled))?;
        }
        Ok(())
    }

    /// Home just the finger axis.
    pub fn homing_finger(&self) -> Result<(), MotionError> {
        let _guard = self.begin_command()?;
        self.state.set_homing(true);
        let profile = self.config.speed_profile(Phase::Homing);
        let state = Arc::clone(&self.state);
        let result = self.z.home(profile, &move || state.fault() || !state.running());
        self.state.set_homing(false);
        result
    }

    /// Lower the finger onto the tray.
    pub fn move_finger_down(&self, travel_mm: f64) -> Result<(), MotionError> {
        let _guard = self.begin_command()?;
        self.move_by_inner(0.0, 0.0, travel_mm, LengthUnit::Mm)
    }

    /// Raise the finger off the tray.
    pub fn move_finger_up(&self, travel_mm: f64) -> Result<(), MotionError> {
        let _guard = self.begin_command()?;
        self.move_by_inner(0.0, 0.0, -travel_mm, LengthUnit::Mm)
    }

    /// Start finger rotation at the given duty cycle.
    pub fn rotate_finger(&self, duty_cycle: u32) -> Result<(), MotionError> {
        self.finger.duty_cycle(duty_cycle)?;
        Ok(())
    }

    /// Stop finger rotation.
    pub fn stop_finger(&self) -> Result<(), MotionError> {
        self.finger.write(Level::Low)?;
        Ok(())
    }

    /// Cancel the X move in flight; returns the pending steps.
    pub fn stop_x(&self) -> u32 {
        self.x.stop()
    }

    /// Cancel the Y move in flight; returns the pending steps.
    pub fn stop_y(&self) -> u32 {
        self.y.stop()
    }

    /// Cancel the Z move in flight; returns the pending steps.
    pub fn stop_z(&self) -> u32 {
        self.z.stop()
    }

    /// Cancel every move in flight.
    pub fn stop(&self) {
        let (x, y, z) = (self.stop_x(), self.stop_y(), self.stop_z());
        debug!(x, y, z, "movement stopped, pending steps dropped");
    }

    /// Energise all stepper drivers.
    pub fn enable_motors(&self) -> Result<(), MotionError> {
        for id in AxisId::ALL {
            self.axis(id).enable()?;
        }
        Ok(())
    }

    /// De-energise all stepper drivers.
    pub fn disable_motors(&self) {
        for id in AxisId::ALL {
            if let Err(error) = self.axis(id).disable() {
                debug!(axis = %id, %error, "disable failed");
            }
        }
    }
}

/// Assembles a [`Movement`] from its devices.
pub struct MovementBuilder {
    config: Arc<Config>,
    state: Arc<SharedState>,
    x: Option<(Arc<StepperMotor>, Arc<dyn DigitalInput>)>,
    y: Option<(Arc<StepperMotor>, Arc<dyn DigitalInput>)>,
    z: Option<(Arc<StepperMotor>, Arc<dyn DigitalInput>)>,
    finger: Option<Arc<dyn Pwm>>,
}

impl MovementBuilder {
    /// Wire one axis from its stepper driver and limit switch.
    pub fn axis(
        mut self,
        id: AxisId,
        motor: Arc<StepperMotor>,
        limit: Arc<dyn DigitalInput>,
    ) -> Self {
        let slot = match id {
            AxisId::X => &mut self.x,
            AxisId::Y => &mut self.y,
            AxisId::Z => &mut self.z,
        };
        *slot = Some((motor, limit));
        self
    }

    /// Wire the finger PWM.
    pub fn finger(mut self, pwm: Arc<dyn Pwm>) -> Self {
        self.finger = Some(pwm);
        self
    }

    /// Build the mechanism; every axis and the finger must be wired.
    pub fn build(self) -> Result<Movement, MotionError> {
        let make_axis = |id: AxisId,
                         slot: Option<(Arc<StepperMotor>, Arc<dyn DigitalInput>)>|
         -> Result<Arc<Axis>, MotionError> {
            let (motor, limit) =
                slot.ok_or_else(|| DeviceError::NotFound(format!("stepper {id}")))?;
            let stepper = self.config.stepper.axis(id);
            let mut engine =
                PulseEngine::new(Arc::clone(&motor), stepper.motor_steps, stepper.microsteps);
            engine.set_profile(
                self.config
                    .speed_profile(Phase::Homing)
                    .band(SpeedBand::Normal)
                    .axis(id),
            );
            Ok(Arc::new(Axis::new(
                id,
                motor,
                limit,
                stepper.steps_per_mm,
                engine,
            )))
        };

        let x = make_axis(AxisId::X, self.x)?;
        let y = make_axis(AxisId::Y, self.y)?;
        let z = make_axis(AxisId::Z, self.z)?;
        let finger = self
            .finger
            .ok_or_else(|| DeviceError::NotFound("finger pwm".into()))?;

        Ok(Movement {
            config: self.config,
            state: self.state,
            x,
            y,
            z,
            finger,
            pool: WorkerPool::new(3),
            busy: AtomicBool::new(false),
            command_total_steps: AtomicU64::new(0),
        })
    }
}
