//! Device-layer error type.

use thiserror::Error;

/// Failures surfaced by the device layer.
///
/// Startup failures abort initialisation; mid-run failures are logged
/// by the caller and folded into a boolean or `Option` at the trait
/// boundary.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// A device with the same key already exists in the registry.
    #[error("device '{0}' is already registered")]
    Duplicate(String),

    /// No device with the given key exists in the registry.
    #[error("device '{0}' is not registered")]
    NotFound(String),

    /// Microstep divisor outside the driver's table.
    #[error("unsupported microstep divisor {0}")]
    Microsteps(u32),

    /// PWM parameter outside its valid range.
    #[error("invalid pwm setting: {0}")]
    Pwm(String),

    /// The underlying pin operation failed.
    #[error("gpio failure on '{id}': {reason}")]
    Gpio { id: String, reason: String },
}
