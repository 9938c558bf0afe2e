//! Task orchestration for the Terra controller.
//!
//! The [`fsm::Machine`] sequences the three plant-tray tasks through a
//! hierarchical state machine fed by a priority event queue, while the
//! [`listener`] threads supervise faults, homing timeouts, the
//! physical reset button and the liquid exchange schedule.

pub mod action;
pub mod context;
pub mod devices;
pub mod error;
pub mod event;
pub mod fsm;
pub mod guard;
pub mod liquid;
pub mod listener;

pub use context::Context;
pub use error::MachineError;
pub use event::{Event, EventSink};
pub use fsm::{Machine, MachineHandle, MachineState};
