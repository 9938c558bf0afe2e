//! Machine-layer error type.

use terra_common::config::ConfigError;
use terra_hal::DeviceError;
use terra_motion::MotionError;
use thiserror::Error;

/// Failures surfaced while bringing the machine up or tearing it down.
///
/// Mid-run unsafe conditions never travel this path; they become the
/// fault flag and a `FaultTrigger` event instead.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Motion(#[from] MotionError),

    /// The exchange sequence was abandoned at a checkpoint.
    #[error("liquid exchange cancelled")]
    ExchangeCancelled,
}
