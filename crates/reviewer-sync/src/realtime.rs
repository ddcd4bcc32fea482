//! RealtimeBridge — applies remote change notifications as they arrive.
//!
//! One channel per synchronized collection, filtered to the signed-in owner.
//! Each event goes through the same last-write-wins merge as pull. A delete
//! event is treated as an update with `deleted = true`; when its payload is
//! too thin to carry a version (only the id), the local record is tombstoned
//! in place. Winning changes are announced on the change feed immediately
//! and to the UI through a [`CoalescingNotifier`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::SyncOptions;
use crate::error::{Result, SyncError};
use crate::reactive::{ChangeEvent, ChangeFeed};
use crate::storage::LocalStore;
use crate::sync::merge::{apply_remote_row, tombstone_in_place, RowOutcome};
use crate::sync::types::{RemoteRow, SyncTransportError};
use crate::sync::wire::row_id;
use crate::types::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeEventKind {
    Insert,
    Update,
    Delete,
}

/// One change notification. Deletes usually carry only `old`.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeEvent {
    pub kind: RealtimeEventKind,
    pub new: Option<RemoteRow>,
    pub old: Option<RemoteRow>,
}

impl RealtimeEvent {
    fn row(&self) -> Option<&RemoteRow> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// User-implemented realtime channel provider.
#[async_trait]
pub trait RealtimeSource: Send + Sync {
    /// Open a channel on `table` filtered to rows owned by `owner`. Dropping
    /// the receiver unsubscribes.
    async fn subscribe(
        &self,
        table: &str,
        owner: &str,
    ) -> std::result::Result<mpsc::Receiver<RealtimeEvent>, SyncTransportError>;
}

// ============================================================================
// CoalescingNotifier
// ============================================================================

/// Single pending flag plus one timer: any number of `notify` calls within
/// the window produce one callback. A `notify` that lands while the callback
/// runs arms one more window instead of being absorbed.
pub struct CoalescingNotifier {
    window: Duration,
    pending: Arc<AtomicBool>,
    armed: Arc<AtomicBool>,
    timer: Mutex<Option<JoinHandle<()>>>,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl CoalescingNotifier {
    pub fn new(window: Duration, callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            window,
            pending: Arc::new(AtomicBool::new(false)),
            armed: Arc::new(AtomicBool::new(false)),
            timer: Mutex::new(None),
            callback: Arc::new(callback),
        }
    }

    pub fn notify(&self) {
        self.pending.store(true, Ordering::SeqCst);
        if self.armed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            // No runtime to wait on: deliver right away.
            self.armed.store(false, Ordering::SeqCst);
            self.fire();
            return;
        };
        let pending = self.pending.clone();
        let armed = self.armed.clone();
        let callback = self.callback.clone();
        let window = self.window;
        let task = handle.spawn(async move {
            loop {
                tokio::time::sleep(window).await;
                if pending.swap(false, Ordering::SeqCst) {
                    callback();
                }
                armed.store(false, Ordering::SeqCst);
                // Rearm for a notify that saw the timer still armed.
                if !pending.load(Ordering::SeqCst) || armed.swap(true, Ordering::SeqCst) {
                    break;
                }
            }
        });
        *self.timer.lock() = Some(task);
    }

    /// Whether a notification is waiting for the window to close.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Drop any pending notification without delivering it.
    pub fn cancel(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        self.pending.store(false, Ordering::SeqCst);
        self.armed.store(false, Ordering::SeqCst);
    }

    fn fire(&self) {
        if self.pending.swap(false, Ordering::SeqCst) {
            (self.callback)();
        }
    }
}

// ============================================================================
// RealtimeBridge
// ============================================================================

struct BridgeInner {
    store: Arc<LocalStore>,
    changes: Arc<ChangeFeed>,
    notifier: Arc<CoalescingNotifier>,
}

impl BridgeInner {
    fn handle_event(&self, collection: Collection, event: &RealtimeEvent) -> Result<RowOutcome> {
        let Some(row) = event.row() else {
            return Ok(RowOutcome::Ignored);
        };
        let Some(id) = row_id(row).map(str::to_string) else {
            return Ok(RowOutcome::Ignored);
        };

        let is_delete = event.kind == RealtimeEventKind::Delete;
        let outcome = if is_delete {
            let mut row = row.clone();
            row.insert("deleted".to_string(), Value::Bool(true));
            match apply_remote_row(&self.store, collection, &row)? {
                RowOutcome::Skipped(_) if !row.contains_key("updated_at") => {
                    tombstone_in_place(&self.store, collection, &id)?
                }
                other => other,
            }
        } else {
            apply_remote_row(&self.store, collection, row)?
        };

        match &outcome {
            RowOutcome::Applied(id) => {
                self.changes.emit(&ChangeEvent::Remote {
                    collection,
                    ids: vec![id.clone()],
                });
                self.notifier.notify();
            }
            RowOutcome::Skipped(e) => {
                warn!(collection = %collection, id = %id, error = %e, "skipping malformed realtime row");
            }
            RowOutcome::Ignored => {}
        }
        Ok(outcome)
    }
}

pub struct RealtimeBridge {
    inner: Arc<BridgeInner>,
    source: Arc<dyn RealtimeSource>,
}

impl RealtimeBridge {
    /// `on_remote_change` is the coalesced re-render trigger.
    pub fn new(
        store: Arc<LocalStore>,
        changes: Arc<ChangeFeed>,
        source: Arc<dyn RealtimeSource>,
        options: &SyncOptions,
        on_remote_change: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let notifier = CoalescingNotifier::new(options.realtime_debounce(), on_remote_change);
        Self {
            inner: Arc::new(BridgeInner {
                store,
                changes,
                notifier: Arc::new(notifier),
            }),
            source,
        }
    }

    /// Apply one event as if it had arrived on `collection`'s channel.
    pub fn handle_event(&self, collection: Collection, event: &RealtimeEvent) -> Result<RowOutcome> {
        self.inner.handle_event(collection, event)
    }

    pub fn notifier(&self) -> &Arc<CoalescingNotifier> {
        &self.inner.notifier
    }

    /// Subscribe every synchronized collection for `owner` and start applying
    /// events. If any subscription fails the ones already opened are closed.
    pub async fn start(&self, owner: &str) -> Result<RealtimeHandle> {
        let mut handle = RealtimeHandle {
            tasks: Vec::new(),
            notifier: self.inner.notifier.clone(),
        };
        for collection in Collection::SYNCED {
            let Some(table) = collection.remote_table() else {
                continue;
            };
            let mut events = self
                .source
                .subscribe(table, owner)
                .await
                .map_err(|source| SyncError::Transport { collection, source })?;

            let inner = self.inner.clone();
            handle.tasks.push(tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if let Err(e) = inner.handle_event(collection, &event) {
                        warn!(collection = %collection, error = %e, "failed to apply realtime event");
                    }
                }
                debug!(collection = %collection, "realtime channel closed");
            }));
        }
        Ok(handle)
    }
}

/// Live subscriptions. Stopping (or dropping) closes every channel and
/// cancels the pending notification.
pub struct RealtimeHandle {
    tasks: Vec<JoinHandle<()>>,
    notifier: Arc<CoalescingNotifier>,
}

impl RealtimeHandle {
    pub fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.notifier.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
