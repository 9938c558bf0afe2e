//! A4988-style stepper driver primitive.
//!
//! Composes the step, direction and enable outputs plus the three
//! microstep-mode pins. The pulse engine owns the timing; this type
//! only knows how to drive the pins.

use std::sync::Arc;

use crate::error::DeviceError;
use crate::gpio::{DigitalOutput, Level};

/// MS3/MS2/MS1 patterns indexed by the bit position of the microstep
/// divisor (1, 2, 4, 8, 16).
pub const MICROSTEP_TABLE: [u8; 5] = [0b000, 0b001, 0b010, 0b011, 0b111];

/// Largest microstep divisor the driver supports.
pub const MAX_MICROSTEPS: u32 = 16;

/// One stepper driver's pin set.
pub struct StepperMotor {
    step: Arc<dyn DigitalOutput>,
    dir: Arc<dyn DigitalOutput>,
    enable: Arc<dyn DigitalOutput>,
    mode: Option<[Arc<dyn DigitalOutput>; 3]>,
}

impl StepperMotor {
    /// Build from the step/dir/enable outputs; mode pins are optional
    /// (they can be strapped in hardware).
    pub fn new(
        step: Arc<dyn DigitalOutput>,
        dir: Arc<dyn DigitalOutput>,
        enable: Arc<dyn DigitalOutput>,
        mode: Option<[Arc<dyn DigitalOutput>; 3]>,
    ) -> Self {
        Self {
            step,
            dir,
            enable,
            mode,
        }
    }

    /// Energise the driver.
    pub fn enable(&self) -> Result<(), DeviceError> {
        self.enable.write(Level::High)
    }

    /// De-energise the driver; the axis can then move freely.
    pub fn disable(&self) -> Result<(), DeviceError> {
        self.enable.write(Level::Low)
    }

    /// Drive the step pin.
    pub fn step(&self, level: Level) -> Result<(), DeviceError> {
        self.step.write(level)
    }

    /// Drive the direction pin; must settle before the next rising
    /// step edge.
    pub fn direction(&self, level: Level) -> Result<(), DeviceError> {
        self.dir.write(level)
    }

    /// Apply a microstep divisor to the mode pins.
    ///
    /// Accepts the power-of-two divisors from [`MICROSTEP_TABLE`];
    /// anything else is rejected.
    pub fn set_microsteps(&self, microsteps: u32) -> Result<(), DeviceError> {
        if !microsteps.is_power_of_two() || microsteps > MAX_MICROSTEPS {
            return Err(DeviceError::Microsteps(microsteps));
        }

        if let Some([ms1, ms2, ms3]) = &self.mode {
            let mask = MICROSTEP_TABLE[microsteps.trailing_zeros() as usize];
            ms3.write(Level::from_bool(mask & 0b100 != 0))?;
            ms2.write(Level::from_bool(mask & 0b010 != 0))?;
            ms1.write(Level::from_bool(mask & 0b001 != 0))?;
        }

        Ok(())
    }
}
