//! SyncStatus — the shared `pushing / pulling / error` status object.
//!
//! Owned by the engine and handed to observers explicitly. Every transition
//! is delivered to subscribers as a [`SyncStatusSnapshot`].

use parking_lot::Mutex;

use crate::error::Result;
use crate::reactive::{EventEmitter, ListenerId};
use crate::storage::LocalStore;
use crate::types::Timestamp;

use super::types::SyncPhase;

pub const LAST_PUSH_KEY: &str = "sync:last_push";
pub const LAST_PULL_KEY: &str = "sync:last_pull";

/// Sync bookkeeping kept in backend metadata, dropped by a local wipe.
pub const SYNC_META_KEYS: [&str; 2] = [LAST_PUSH_KEY, LAST_PULL_KEY];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatusSnapshot {
    pub pushing: bool,
    pub pulling: bool,
    /// Message of the most recent failure, cleared when a new push or pull starts.
    pub error: Option<String>,
    /// Completion time of the last successful push.
    pub last_push: Option<Timestamp>,
    /// Checkpoint of the last successful pull (its start time).
    pub last_pull: Option<Timestamp>,
}

#[derive(Default)]
pub struct SyncStatus {
    state: Mutex<SyncStatusSnapshot>,
    listeners: EventEmitter<SyncStatusSnapshot>,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status seeded with the persisted `last_push` / `last_pull`.
    pub fn restore(store: &LocalStore) -> Result<Self> {
        let status = Self::new();
        {
            let mut state = status.state.lock();
            state.last_push = read_timestamp(store, LAST_PUSH_KEY)?;
            state.last_pull = read_timestamp(store, LAST_PULL_KEY)?;
        }
        Ok(status)
    }

    pub fn snapshot(&self) -> SyncStatusSnapshot {
        self.state.lock().clone()
    }

    pub fn is_pushing(&self) -> bool {
        self.state.lock().pushing
    }

    pub fn is_pulling(&self) -> bool {
        self.state.lock().pulling
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn subscribe(
        &self,
        callback: impl Fn(&SyncStatusSnapshot) + Send + Sync + 'static,
    ) -> ListenerId {
        self.listeners.on(callback)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.off(id);
    }

    // -----------------------------------------------------------------------
    // Transitions (engine only)
    // -----------------------------------------------------------------------

    /// Raise the phase flag and clear the previous error. The flag drops when
    /// the returned guard does, whatever the outcome.
    pub(crate) fn begin(&self, phase: SyncPhase) -> PhaseGuard<'_> {
        self.update(|s| {
            match phase {
                SyncPhase::Push => s.pushing = true,
                SyncPhase::Pull => s.pulling = true,
            }
            s.error = None;
        });
        PhaseGuard {
            status: self,
            phase,
        }
    }

    pub(crate) fn record_error(&self, message: String) {
        self.update(|s| s.error = Some(message));
    }

    pub(crate) fn record_success(&self, phase: SyncPhase, at: Timestamp) {
        self.update(|s| match phase {
            SyncPhase::Push => s.last_push = Some(at),
            SyncPhase::Pull => s.last_pull = Some(at),
        });
    }

    /// Forget sync bookkeeping after a local wipe.
    pub fn reset(&self) {
        self.update(|s| *s = SyncStatusSnapshot::default());
    }

    fn update(&self, f: impl FnOnce(&mut SyncStatusSnapshot)) {
        let snapshot = {
            let mut state = self.state.lock();
            f(&mut state);
            state.clone()
        };
        // A panicking observer must not poison the sync path.
        self.listeners.emit_isolated(&snapshot);
    }
}

/// Clears the phase flag on drop.
pub(crate) struct PhaseGuard<'a> {
    status: &'a SyncStatus,
    phase: SyncPhase,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        let phase = self.phase;
        self.status.update(|s| match phase {
            SyncPhase::Push => s.pushing = false,
            SyncPhase::Pull => s.pulling = false,
        });
    }
}

fn read_timestamp(store: &LocalStore, key: &str) -> Result<Option<Timestamp>> {
    Ok(store.get_meta(key)?.and_then(|raw| raw.parse().ok()))
}
