//! Trailing-edge debouncer
//!
//! Each [`Debouncer::trigger`] restarts the delay; the action runs once the
//! triggers stop for a full delay. Safe to trigger from non-async contexts
//! (filesystem watcher callbacks) because it spawns on a stored runtime
//! handle rather than the ambient one.

use std::sync::Mutex;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

pub struct Debouncer {
    delay: Duration,
    runtime: Handle,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    /// Create a debouncer bound to the given runtime
    pub fn new(delay: Duration, runtime: Handle) -> Self {
        Self {
            delay,
            runtime,
            pending: Mutex::new(None),
        }
    }

    /// Create a debouncer bound to the current runtime, if there is one
    pub fn current(delay: Duration) -> Option<Self> {
        Handle::try_current()
            .ok()
            .map(|runtime| Self::new(delay, runtime))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `action` after the delay, replacing any pending action
    pub fn trigger<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.trigger_after(self.delay, action);
    }

    /// Like [`trigger`](Self::trigger) with an explicit delay
    pub fn trigger_after<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
    }

    /// Drop the pending action, if any
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = pending.take() {
            task.abort();
        }
    }

    /// Whether an action is waiting to run
    pub fn is_pending(&self) -> bool {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
