//! Long-lived supervisor threads.
//!
//! Each listener watches one condition through the shared state's
//! condition variable and turns it into an event for the state
//! machine. Listeners hold only the event sink, never the machine, so
//! ownership stays one-directional: the machine owns the listeners.
//!
//! Waits are bounded so a listener re-checks its own shutdown flag
//! even when the machine state never changes.

mod fault;
mod refill;
mod restart;
mod task_timeout;

pub use fault::{FaultCause, FaultListener};
pub use refill::RefillListener;
pub use restart::RestartFaultListener;
pub use task_timeout::TaskTimeoutListener;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tracing::info;

/// A supervisor that can be started and stopped.
pub trait Listener: Send {
    fn name(&self) -> &'static str;
    fn start(&mut self);
    fn stop(&mut self);
}

/// Thread handle plus liveness flag shared with the loop.
pub(crate) struct ListenerCore {
    alive: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ListenerCore {
    pub(crate) fn new() -> Self {
        Self {
            alive: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Flag the loop should poll to keep running.
    pub(crate) fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    pub(crate) fn start(&mut self, name: &'static str, body: impl FnOnce() + Send + 'static) {
        if self.handle.is_some() {
            return;
        }
        info!("starting {name}");
        self.alive.store(true, Ordering::SeqCst);
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(body)
            .expect("spawn listener thread");
        self.handle = Some(handle);
    }

    pub(crate) fn stop(&mut self, name: &'static str) {
        if self.handle.is_none() {
            return;
        }
        info!("stopping {name}");
        self.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ListenerCore {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
