//! Shared runtime context.
//!
//! One bundle built at startup and passed by reference everywhere a
//! guard, action or listener needs the machine's collaborators. There
//! is no global state; everything reachable flows through here.

use std::sync::Arc;

use terra_common::config::Config;
use terra_common::state::SharedState;
use terra_motion::Movement;

use crate::devices::DeviceSet;
use crate::event::EventSink;

/// The machine's collaborators.
pub struct Context {
    pub config: Arc<Config>,
    pub state: Arc<SharedState>,
    pub devices: Arc<DeviceSet>,
    pub movement: Arc<Movement>,
    pub sink: EventSink,
}

impl Context {
    /// True while no task is holding the gantry and nothing is faulted.
    pub fn idle(&self) -> bool {
        self.state
            .with(|s| !s.fault && !s.homing && !s.any_task_running())
    }
}
