//! Machine events and the priority queue that carries them.
//!
//! Events are processed in priority order, not arrival order: a fault
//! trigger posted after a batch of task events still preempts all of
//! them. Ties fall back to arrival order so same-priority events stay
//! first-in first-out.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use terra_common::types::TaskKind;

/// Everything the state machine reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Bring the machine up.
    Start,
    /// Shut the machine down.
    Stop,
    /// An unsafe condition was observed; the fault flag is already set.
    FaultTrigger,
    /// Operator entered manual jog mode inside fault.
    FaultManual,
    /// Operator pressed the physical reset; the fault flag is cleared.
    FaultRestart,
    /// The finished task's completion handshake is done.
    TaskComplete,
    /// Begin a task from `no_task`.
    TaskStart(TaskKind),
    /// Run the prepared task's job.
    TaskRun(TaskKind),
}

impl Event {
    /// Queue priority; higher preempts lower.
    pub fn priority(&self) -> u8 {
        match self {
            Event::FaultTrigger => 3,
            Event::FaultManual => 2,
            Event::FaultRestart => 1,
            _ => 0,
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
struct Queued {
    priority: u8,
    seq: u64,
    event: Event,
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then lower sequence first.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Priority queue the state-machine thread drains.
#[derive(Default)]
pub struct EventQueue {
    heap: Mutex<BinaryHeap<Queued>>,
    signal: Condvar,
    seq: AtomicU64,
}

impl EventQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue an event.
    pub fn post(&self, event: Event) {
        let queued = Queued {
            priority: event.priority(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            event,
        };
        self.heap.lock().push(queued);
        self.signal.notify_all();
    }

    /// Take the highest-priority event, waiting up to `timeout`.
    pub fn pop(&self, timeout: Duration) -> Option<Event> {
        let mut heap = self.heap.lock();
        loop {
            if let Some(queued) = heap.pop() {
                return Some(queued.event);
            }
            if self.signal.wait_for(&mut heap, timeout).timed_out() {
                return heap.pop().map(|q| q.event);
            }
        }
    }

    /// Events currently queued.
    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

/// Cloneable posting handle held by listeners and actions.
///
/// Listeners keep only this, never the machine itself, which keeps the
/// ownership between the machine and its listeners one-directional.
#[derive(Clone)]
pub struct EventSink {
    queue: Arc<EventQueue>,
}

impl EventSink {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }

    pub fn post(&self, event: Event) {
        self.queue.post(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_within_equal_priority() {
        let queue = EventQueue::new();
        queue.post(Event::TaskStart(TaskKind::Spraying));
        queue.post(Event::TaskStart(TaskKind::Tending));
        queue.post(Event::TaskComplete);

        let timeout = Duration::from_millis(10);
        assert_eq!(
            queue.pop(timeout),
            Some(Event::TaskStart(TaskKind::Spraying))
        );
        assert_eq!(
            queue.pop(timeout),
            Some(Event::TaskStart(TaskKind::Tending))
        );
        assert_eq!(queue.pop(timeout), Some(Event::TaskComplete));
        assert_eq!(queue.pop(timeout), None);
    }

    #[test]
    fn fault_trigger_preempts_earlier_events() {
        let queue = EventQueue::new();
        queue.post(Event::TaskStart(TaskKind::Cleaning));
        queue.post(Event::TaskRun(TaskKind::Cleaning));
        queue.post(Event::FaultTrigger);

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.pop(timeout), Some(Event::FaultTrigger));
        assert_eq!(
            queue.pop(timeout),
            Some(Event::TaskStart(TaskKind::Cleaning))
        );
    }

    #[test]
    fn fault_events_rank_trigger_manual_restart() {
        let queue = EventQueue::new();
        queue.post(Event::FaultRestart);
        queue.post(Event::FaultManual);
        queue.post(Event::FaultTrigger);
        queue.post(Event::Stop);

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.pop(timeout), Some(Event::FaultTrigger));
        assert_eq!(queue.pop(timeout), Some(Event::FaultManual));
        assert_eq!(queue.pop(timeout), Some(Event::FaultRestart));
        assert_eq!(queue.pop(timeout), Some(Event::Stop));
    }

    #[test]
    fn pop_wakes_on_cross_thread_post() {
        let queue = EventQueue::new();
        let poster = Arc::clone(&queue);

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            poster.post(Event::Start);
        });

        let event = queue.pop(Duration::from_secs(5));
        handle.join().expect("poster");
        assert_eq!(event, Some(Event::Start));
    }
}
