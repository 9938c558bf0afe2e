//! Transition guards.
//!
//! Thin predicates over the inputs and the shared state, used by the
//! state machine before it commits a transition and by the supervisory
//! listeners when they poll.

use terra_common::consts::input;
use terra_common::state::SharedState;
use terra_common::types::TaskKind;

use crate::devices::DeviceSet;

fn read(devices: &DeviceSet, id: &str) -> bool {
    devices
        .input(id)
        .map(|device| device.is_active())
        .unwrap_or(false)
}

/// PLC emergency stop reads active.
pub fn e_stop(devices: &DeviceSet) -> bool {
    read(devices, input::E_STOP)
}

/// Physical reset button reads active.
pub fn reset(devices: &DeviceSet) -> bool {
    read(devices, input::RESET)
}

/// The tray is at spraying/tending height.
pub fn height_spraying_tending(devices: &DeviceSet) -> bool {
    read(devices, input::SPRAYING_TENDING_HEIGHT)
}

/// The tray is at cleaning height.
pub fn height_cleaning(devices: &DeviceSet) -> bool {
    read(devices, input::CLEANING_HEIGHT)
}

/// The finger-protection switch is touched.
pub fn finger_protection(devices: &DeviceSet) -> bool {
    read(devices, input::FINGER_PROTECTION)
}

/// An X or Y limit switch is closed.
pub fn limit_switch_xy(devices: &DeviceSet) -> bool {
    read(devices, input::LIMIT_SWITCH_X) || read(devices, input::LIMIT_SWITCH_Y)
}

/// The shared fault flag is up.
pub fn fault(state: &SharedState) -> bool {
    state.fault()
}

/// The given task has raised its completion flag.
pub fn task_completed(state: &SharedState, kind: TaskKind) -> bool {
    state.task(kind).complete
}
