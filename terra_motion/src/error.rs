//! Motion-layer error type.

use terra_common::types::AxisId;
use terra_hal::DeviceError;
use thiserror::Error;

/// Failures surfaced by the motion layer.
#[derive(Debug, Clone, Error)]
pub enum MotionError {
    /// Another high-level movement command is already in flight.
    #[error("movement mechanism is busy")]
    Busy,

    /// A homing seek finished its envelope without the switch closing.
    #[error("axis {0} did not reach its limit switch")]
    LimitNotReached(AxisId),

    /// The command was abandoned at a cancellation checkpoint.
    #[error("movement cancelled")]
    Cancelled,

    /// A pin operation failed underneath the move.
    #[error(transparent)]
    Device(#[from] DeviceError),
}
