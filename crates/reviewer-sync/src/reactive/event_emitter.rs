//! Typed synchronous listener list shared by the change feed, the dirty
//! tracker's mark notifications and the sync status.
//!
//! Listeners are snapshotted before each delivery and the lock is released
//! before any of them runs, so a listener may subscribe or unsubscribe from
//! inside its own callback. A listener removed mid-delivery still sees that
//! event; one added mid-delivery first sees the next.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Handle returned by [`EventEmitter::on`], accepted by [`EventEmitter::off`].
pub type ListenerId = u64;

pub type ListenerFn<T> = dyn Fn(&T) + Send + Sync;

pub struct EventEmitter<T> {
    listeners: Mutex<Vec<(ListenerId, Arc<ListenerFn<T>>)>>,
    next_id: AtomicU64,
}

impl<T> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn on(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(callback)));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn off(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Deliver `event` in registration order. A panicking listener unwinds
    /// through the caller and later listeners miss the event.
    pub fn emit(&self, event: &T) {
        for cb in self.snapshot() {
            cb(event);
        }
    }

    /// Deliver `event` to every listener even if some of them panic.
    /// Returns how many panicked.
    pub fn emit_isolated(&self, event: &T) -> usize {
        let mut panicked = 0;
        for (id, cb) in self.snapshot_with_ids() {
            if catch_unwind(AssertUnwindSafe(|| cb(event))).is_err() {
                warn!(listener = id, "listener panicked");
                panicked += 1;
            }
        }
        panicked
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<ListenerFn<T>>> {
        self.listeners
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect()
    }

    fn snapshot_with_ids(&self) -> Vec<(ListenerId, Arc<ListenerFn<T>>)> {
        self.listeners
            .lock()
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect()
    }
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}
