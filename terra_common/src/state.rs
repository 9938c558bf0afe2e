//! Process-wide machine state.
//!
//! One mutex, one condition variable. Every setter takes the lock,
//! mutates, and broadcasts, so a writer's change is visible to all
//! waiters before the broadcast returns. Readers either snapshot under
//! the lock or block on [`SharedState::wait_until`] with a predicate.
//!
//! Setters enforce the task-safety invariants: raising `fault` drops
//! every task `running` flag and manual mode, and no task `running`
//! flag can be raised while `fault` holds.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::types::{Coordinate, Liquid, TaskKind};

/// Ready/running/complete trio for one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFlags {
    pub ready: bool,
    pub running: bool,
    pub complete: bool,
}

/// Scheduling flags and timestamps for one liquid tank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefillFlags {
    pub running: bool,
    pub requested: bool,
    /// Unix timestamp of the last completed exchange, seconds.
    pub last_executed: u64,
    /// Unix timestamp after which the next exchange is due, seconds.
    pub next_executed: u64,
}

/// Full copy of the machine state at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StateSnapshot {
    /// Process-alive flag; cleared once on shutdown.
    pub running: bool,
    pub fault: bool,
    pub manual_mode: bool,
    pub homing: bool,
    pub spraying: TaskFlags,
    pub tending: TaskFlags,
    pub cleaning: TaskFlags,
    pub water: RefillFlags,
    pub disinfectant: RefillFlags,
    /// Gantry position in millimetres, updated after each commanded move.
    pub coordinate: Coordinate,
}

impl StateSnapshot {
    /// Flags for the given task.
    #[inline]
    pub fn task(&self, kind: TaskKind) -> TaskFlags {
        match kind {
            TaskKind::Spraying => self.spraying,
            TaskKind::Tending => self.tending,
            TaskKind::Cleaning => self.cleaning,
        }
    }

    /// Flags for the given liquid.
    #[inline]
    pub fn refill(&self, liquid: Liquid) -> RefillFlags {
        match liquid {
            Liquid::Water => self.water,
            Liquid::Disinfectant => self.disinfectant,
        }
    }

    /// True while any task `running` flag is up.
    #[inline]
    pub fn any_task_running(&self) -> bool {
        self.spraying.running || self.tending.running || self.cleaning.running
    }
}

/// Shared machine state guarded by a single mutex.
#[derive(Debug, Default)]
pub struct SharedState {
    data: Mutex<StateSnapshot>,
    signal: Condvar,
}

impl SharedState {
    /// Fresh state with the process-alive flag raised.
    pub fn new() -> Self {
        let state = Self::default();
        state.data.lock().running = true;
        state
    }

    /// Run a closure against the current state under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&StateSnapshot) -> R) -> R {
        f(&self.data.lock())
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> StateSnapshot {
        *self.data.lock()
    }

    /// Block until the predicate holds, or until `timeout` elapses.
    ///
    /// Returns the snapshot that satisfied the predicate, or `None` on
    /// timeout. Listeners pass a bounded timeout so their own shutdown
    /// flag is re-checked even when nothing changes.
    pub fn wait_until(
        &self,
        timeout: Duration,
        predicate: impl Fn(&StateSnapshot) -> bool,
    ) -> Option<StateSnapshot> {
        let mut data = self.data.lock();
        loop {
            if predicate(&data) {
                return Some(*data);
            }
            if self.signal.wait_for(&mut data, timeout).timed_out() {
                return if predicate(&data) { Some(*data) } else { None };
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut StateSnapshot)) {
        let mut data = self.data.lock();
        f(&mut data);
        drop(data);
        self.signal.notify_all();
    }

    // ── Process lifecycle ───────────────────────────────────────────

    pub fn running(&self) -> bool {
        self.data.lock().running
    }

    pub fn set_running(&self, value: bool) {
        self.update(|s| s.running = value);
    }

    // ── Fault and modes ─────────────────────────────────────────────

    pub fn fault(&self) -> bool {
        self.data.lock().fault
    }

    /// Raise or clear the fault flag.
    ///
    /// Raising it also drops every task `running` flag and leaves
    /// manual mode; tasks observe the flag at their next checkpoint.
    pub fn set_fault(&self, value: bool) {
        self.update(|s| {
            s.fault = value;
            if value {
                s.spraying.running = false;
                s.tending.running = false;
                s.cleaning.running = false;
                s.manual_mode = false;
            }
        });
    }

    pub fn manual_mode(&self) -> bool {
        self.data.lock().manual_mode
    }

    pub fn set_manual_mode(&self, value: bool) {
        self.update(|s| s.manual_mode = value);
    }

    pub fn homing(&self) -> bool {
        self.data.lock().homing
    }

    pub fn set_homing(&self, value: bool) {
        self.update(|s| s.homing = value);
    }

    // ── Task flags ──────────────────────────────────────────────────

    pub fn task(&self, kind: TaskKind) -> TaskFlags {
        self.data.lock().task(kind)
    }

    pub fn set_task_ready(&self, kind: TaskKind, value: bool) {
        self.update(|s| Self::task_mut(s, kind).ready = value);
    }

    /// Set a task `running` flag.
    ///
    /// Refused while `fault` holds; returns whether the flag was
    /// applied.
    pub fn set_task_running(&self, kind: TaskKind, value: bool) -> bool {
        let mut applied = true;
        self.update(|s| {
            if value && s.fault {
                warn!("refusing to start {kind} while fault is active");
                applied = false;
            } else {
                Self::task_mut(s, kind).running = value;
            }
        });
        applied
    }

    pub fn set_task_complete(&self, kind: TaskKind, value: bool) {
        self.update(|s| Self::task_mut(s, kind).complete = value);
    }

    fn task_mut(s: &mut StateSnapshot, kind: TaskKind) -> &mut TaskFlags {
        match kind {
            TaskKind::Spraying => &mut s.spraying,
            TaskKind::Tending => &mut s.tending,
            TaskKind::Cleaning => &mut s.cleaning,
        }
    }

    /// Drop every task and mode flag except the process-alive flag and
    /// the refilling timestamps.
    pub fn reset_ui(&self) {
        self.update(|s| {
            s.fault = false;
            s.manual_mode = false;
            s.homing = false;
            s.spraying = TaskFlags::default();
            s.tending = TaskFlags::default();
            s.cleaning = TaskFlags::default();
            s.water.running = false;
            s.water.requested = false;
            s.disinfectant.running = false;
            s.disinfectant.requested = false;
        });
    }

    // ── Coordinates ─────────────────────────────────────────────────

    pub fn coordinate(&self) -> Coordinate {
        self.data.lock().coordinate
    }

    pub fn set_coordinate(&self, value: Coordinate) {
        self.update(|s| s.coordinate = value);
    }

    /// Shift the stored position by a completed move's delta.
    pub fn offset_coordinate(&self, delta: Coordinate) {
        self.update(|s| s.coordinate += delta);
    }

    pub fn reset_coordinate(&self) {
        self.set_coordinate(Coordinate::ORIGIN);
    }

    // ── Liquid refilling ────────────────────────────────────────────

    pub fn refill(&self, liquid: Liquid) -> RefillFlags {
        self.data.lock().refill(liquid)
    }

    pub fn set_refill_requested(&self, liquid: Liquid, value: bool) {
        self.update(|s| Self::refill_mut(s, liquid).requested = value);
    }

    pub fn set_refill_running(&self, liquid: Liquid, value: bool) {
        self.update(|s| Self::refill_mut(s, liquid).running = value);
    }

    /// Record a completed exchange and schedule the next one.
    pub fn mark_refill_executed(&self, liquid: Liquid, now_secs: u64, period_secs: u64) {
        self.update(|s| {
            let refill = Self::refill_mut(s, liquid);
            refill.last_executed = now_secs;
            refill.next_executed = now_secs + period_secs;
        });
    }

    fn refill_mut(s: &mut StateSnapshot, liquid: Liquid) -> &mut RefillFlags {
        match liquid {
            Liquid::Water => &mut s.water,
            Liquid::Disinfectant => &mut s.disinfectant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn new_state_is_alive_and_clean() {
        let state = SharedState::new();
        let snap = state.snapshot();
        assert!(snap.running);
        assert!(!snap.fault);
        assert!(!snap.any_task_running());
    }

    #[test]
    fn fault_clears_running_tasks_and_manual_mode() {
        let state = SharedState::new();
        assert!(state.set_task_running(TaskKind::Tending, true));
        state.set_manual_mode(true);

        state.set_fault(true);
        let snap = state.snapshot();
        assert!(snap.fault);
        assert!(!snap.any_task_running());
        assert!(!snap.manual_mode);
    }

    #[test]
    fn task_cannot_start_while_faulted() {
        let state = SharedState::new();
        state.set_fault(true);
        assert!(!state.set_task_running(TaskKind::Spraying, true));
        assert!(!state.task(TaskKind::Spraying).running);

        state.set_fault(false);
        assert!(state.set_task_running(TaskKind::Spraying, true));
        assert!(state.task(TaskKind::Spraying).running);
    }

    #[test]
    fn clearing_a_task_is_allowed_during_fault() {
        let state = SharedState::new();
        state.set_task_running(TaskKind::Cleaning, true);
        state.set_fault(true);
        assert!(state.set_task_running(TaskKind::Cleaning, false));
    }

    #[test]
    fn reset_ui_keeps_alive_flag_and_timestamps() {
        let state = SharedState::new();
        state.set_fault(true);
        state.set_task_ready(TaskKind::Spraying, true);
        state.mark_refill_executed(Liquid::Water, 1_000, 60);

        state.reset_ui();
        let snap = state.snapshot();
        assert!(snap.running);
        assert!(!snap.fault);
        assert_eq!(snap.spraying, TaskFlags::default());
        assert_eq!(snap.water.last_executed, 1_000);
        assert_eq!(snap.water.next_executed, 1_060);
    }

    #[test]
    fn refill_schedule_is_last_plus_period() {
        let state = SharedState::new();
        state.mark_refill_executed(Liquid::Disinfectant, 5_000, 86_400);
        let refill = state.refill(Liquid::Disinfectant);
        assert_eq!(refill.next_executed, refill.last_executed + 86_400);
    }

    #[test]
    fn coordinate_offsets_accumulate() {
        let state = SharedState::new();
        state.offset_coordinate(Coordinate::new(10.0, 0.0, 0.0));
        state.offset_coordinate(Coordinate::new(-2.0, 5.0, 0.0));
        assert_eq!(state.coordinate(), Coordinate::new(8.0, 5.0, 0.0));
        state.reset_coordinate();
        assert_eq!(state.coordinate(), Coordinate::ORIGIN);
    }

    #[test]
    fn wait_until_wakes_on_setter_broadcast() {
        let state = Arc::new(SharedState::new());
        let waiter = Arc::clone(&state);

        let handle = std::thread::spawn(move || {
            waiter.wait_until(Duration::from_secs(5), |s| s.fault)
        });

        std::thread::sleep(Duration::from_millis(50));
        state.set_fault(true);

        let snap = handle.join().expect("waiter thread");
        assert!(snap.expect("predicate satisfied").fault);
    }

    #[test]
    fn wait_until_times_out_when_nothing_changes() {
        let state = SharedState::new();
        let result = state.wait_until(Duration::from_millis(50), |s| s.fault);
        assert!(result.is_none());
    }
}
