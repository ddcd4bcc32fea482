//! PushScheduler — debounced auto-push driven by dirty marks.
//!
//! Each dirty mark restarts a single timer; only the last mark in a burst
//! leads to a push. When the timer fires the push is skipped (not queued)
//! if nobody is signed in or a push is already running, and failures are
//! logged and swallowed. The status object still records them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SyncOptions;
use crate::dirty::DirtyTracker;
use crate::reactive::ListenerId;

use super::engine::SyncEngine;

pub struct PushScheduler {
    engine: Arc<SyncEngine>,
    dirty: Arc<DirtyTracker>,
    delay: Duration,
    pending: Mutex<Option<Pending>>,
    listener: Mutex<Option<ListenerId>>,
    disposed: AtomicBool,
}

/// An armed timer. Once `fired` is set the push is running and must not be
/// aborted by a newer mark; the newer timer simply runs after it.
struct Pending {
    task: JoinHandle<()>,
    fired: Arc<AtomicBool>,
}

impl Pending {
    fn cancel(self) {
        if !self.fired.load(Ordering::SeqCst) {
            self.task.abort();
        }
    }
}

impl PushScheduler {
    /// Create a scheduler and subscribe it to `dirty`'s mark events.
    pub fn start(
        engine: Arc<SyncEngine>,
        dirty: Arc<DirtyTracker>,
        options: &SyncOptions,
    ) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            engine,
            dirty: dirty.clone(),
            delay: options.push_debounce(),
            pending: Mutex::new(None),
            listener: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        let weak: Weak<Self> = Arc::downgrade(&scheduler);
        let id = dirty.on_mark(move |_| {
            if let Some(scheduler) = weak.upgrade() {
                scheduler.schedule();
            }
        });
        *scheduler.listener.lock() = Some(id);
        scheduler
    }

    /// (Re)start the debounce timer. Needs an ambient tokio runtime; without
    /// one the mark stays in the dirty set for the next explicit push.
    pub fn schedule(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!("no tokio runtime; auto-push not scheduled");
            return;
        };

        let engine = self.engine.clone();
        let delay = self.delay;
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            flag.store(true, Ordering::SeqCst);
            auto_push(&engine).await;
        });

        if let Some(previous) = self.pending.lock().replace(Pending { task, fired }) {
            previous.cancel();
        }
    }

    /// Whether a debounce timer is armed or its push is still running.
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|p| !p.task.is_finished())
    }

    /// Stop listening for marks and cancel any armed timer.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        if let Some(id) = self.listener.lock().take() {
            self.dirty.off_mark(id);
        }
        if let Some(pending) = self.pending.lock().take() {
            pending.cancel();
        }
    }
}

impl Drop for PushScheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn auto_push(engine: &SyncEngine) {
    if engine.auth().current_identity().is_none() {
        debug!("auto-push skipped: not signed in");
        return;
    }
    if engine.status().is_pushing() {
        debug!("auto-push skipped: push already in flight");
        return;
    }
    if let Err(e) = engine.push_all().await {
        warn!(error = %e, "auto-push failed");
    }
}
