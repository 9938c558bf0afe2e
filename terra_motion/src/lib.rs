//! Motion layer of the Terra controller.
//!
//! [`pulse`] turns a signed step count into precisely paced step
//! pulses with trapezoidal speed ramps; [`axis`] pairs one pulse
//! engine with its limit switch; [`movement`] coordinates the three
//! axes over a small worker [`pool`].

pub mod axis;
pub mod error;
pub mod movement;
pub mod pool;
pub mod pulse;

pub use axis::Axis;
pub use error::MotionError;
pub use movement::Movement;
pub use pool::WorkerPool;
pub use pulse::{Direction, MotionPhase, PulseEngine, SpeedMode};
