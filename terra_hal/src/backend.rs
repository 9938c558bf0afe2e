//! Backend factory for pin devices.
//!
//! A backend turns an instance id into a live device handle. The
//! simulation backend is the default in tests and on development
//! machines; a real GPIO backend implements the same trait on target
//! hardware.

use std::sync::Arc;

use crate::gpio::{DigitalInput, DigitalOutput, Pwm};

/// Factory for the pin devices a machine needs.
pub trait Backend: Send + Sync {
    /// Digital input with the given polarity; `active_low` inverts the
    /// raw pin level before it is reported.
    fn digital_input(&self, id: &str, active_low: bool) -> Arc<dyn DigitalInput>;

    /// Digital output.
    fn digital_output(&self, id: &str) -> Arc<dyn DigitalOutput>;

    /// PWM output.
    fn pwm(&self, id: &str) -> Arc<dyn Pwm>;
}
