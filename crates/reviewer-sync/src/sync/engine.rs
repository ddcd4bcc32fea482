//! SyncEngine — push dirty records up, pull newer remote records down.
//!
//! Both operations need an authenticated identity and run collection by
//! collection in [`Collection::SYNCED`] order. A transport failure aborts the
//! operation at the failing collection: its dirty ids stay put (push) and the
//! checkpoint does not move (pull). Failures are recorded on the shared
//! [`SyncStatus`] and returned to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::dirty::{DirtySet, DirtyTracker};
use crate::error::{Result, SyncError};
use crate::reactive::{ChangeEvent, ChangeFeed};
use crate::storage::LocalStore;
use crate::types::{Article, Collection, MagicItem, Record, Settings, Timestamp, VocabItem};

use super::merge::{apply_remote_row, RowOutcome};
use super::status::{SyncStatus, LAST_PULL_KEY, LAST_PUSH_KEY};
use super::types::{
    AuthProvider, PullReport, PushReport, RemoteRow, SyncPhase, SyncReport, SyncTransport,
};
use super::wire::WireRecord;

/// Collaborators of a [`SyncEngine`].
pub struct SyncEngineOptions {
    pub store: Arc<LocalStore>,
    pub dirty: Arc<DirtyTracker>,
    pub transport: Arc<dyn SyncTransport>,
    pub auth: Arc<dyn AuthProvider>,
    pub clock: Arc<dyn Clock>,
    pub changes: Arc<ChangeFeed>,
}

pub struct SyncEngine {
    store: Arc<LocalStore>,
    dirty: Arc<DirtyTracker>,
    transport: Arc<dyn SyncTransport>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    changes: Arc<ChangeFeed>,
    status: Arc<SyncStatus>,
}

impl SyncEngine {
    pub fn new(options: SyncEngineOptions) -> Result<Self> {
        let status = Arc::new(SyncStatus::restore(&options.store)?);

        let on_wipe = Arc::downgrade(&status);
        options.changes.on(move |event| {
            if matches!(event, ChangeEvent::Wiped) {
                if let Some(status) = on_wipe.upgrade() {
                    status.reset();
                }
            }
        });

        Ok(Self {
            store: options.store,
            dirty: options.dirty,
            transport: options.transport,
            auth: options.auth,
            clock: options.clock,
            changes: options.changes,
            status,
        })
    }

    pub fn status(&self) -> &Arc<SyncStatus> {
        &self.status
    }

    pub fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    fn identity(&self) -> Result<String> {
        self.auth
            .current_identity()
            .ok_or_else(|| SyncError::NotAuthenticated.into())
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Upload every dirty record and clear exactly the ids that were uploaded.
    /// Re-pushing an unchanged record is a harmless repeat upsert.
    pub async fn push_all(&self) -> Result<PushReport> {
        let owner = self.identity()?;
        let dirty = self.dirty.snapshot()?;
        if dirty.values().all(|ids| ids.is_empty()) {
            return Ok(PushReport::default());
        }

        let _guard = self.status.begin(SyncPhase::Push);
        match self.push_inner(&owner, &dirty).await {
            Ok(report) => {
                let now = self.clock.now_ms();
                self.store.set_meta(LAST_PUSH_KEY, &now.to_string())?;
                self.status.record_success(SyncPhase::Push, now);
                debug!(pushed = report.total(), "push complete");
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "push failed");
                self.status.record_error(e.to_string());
                Err(e)
            }
        }
    }

    async fn push_inner(&self, owner: &str, dirty: &DirtySet) -> Result<PushReport> {
        let mut report = PushReport::default();
        for collection in Collection::SYNCED {
            let Some(ids) = dirty.get(&collection).filter(|ids| !ids.is_empty()) else {
                continue;
            };
            let ids: Vec<String> = ids.iter().cloned().collect();
            let pushed = match collection {
                Collection::Items => {
                    self.push_collection::<VocabItem>(collection, owner, &ids).await?
                }
                Collection::Articles | Collection::UnreadArticles => {
                    self.push_collection::<Article>(collection, owner, &ids).await?
                }
                Collection::MagicItems => {
                    self.push_collection::<MagicItem>(collection, owner, &ids).await?
                }
                Collection::Settings => {
                    self.push_collection::<Settings>(collection, owner, &ids).await?
                }
                Collection::State => continue,
            };
            report.missing += ids.len() - pushed;
            report.pushed.insert(collection, pushed);
        }
        Ok(report)
    }

    /// Upsert the current versions of `ids`, then clear the ids whose stored
    /// record is still the one that was sent. An id edited while the upsert
    /// was in flight stays dirty for the next push. Returns the number of
    /// rows sent.
    async fn push_collection<T: WireRecord + PartialEq>(
        &self,
        collection: Collection,
        owner: &str,
        ids: &[String],
    ) -> Result<usize> {
        let Some(table) = collection.remote_table() else {
            return Ok(0);
        };
        let sent: HashMap<String, T> = self
            .store
            .get_many::<T>(collection, ids)?
            .into_iter()
            .map(|record| (record.key().to_string(), record))
            .collect();
        let rows: Vec<RemoteRow> = ids
            .iter()
            .filter_map(|id| sent.get(id))
            .map(|record| record.to_wire(owner))
            .collect();

        if !rows.is_empty() {
            self.transport
                .upsert(table, &rows)
                .await
                .map_err(|source| SyncError::Transport { collection, source })?;
        }
        let kept = self.dirty.clear_unchanged(collection, ids, |id| {
            let current = self.store.get::<T>(collection, id)?;
            Ok(current.as_ref() == sent.get(id))
        })?;
        if !kept.is_empty() {
            debug!(collection = %collection, kept = kept.len(), "records changed during push");
        }
        debug!(collection = %collection, rows = rows.len(), "pushed collection");
        Ok(rows.len())
    }

    // -----------------------------------------------------------------------
    // Pull
    // -----------------------------------------------------------------------

    /// Checkpoint of the last successful pull, if any.
    pub fn last_pull(&self) -> Result<Option<Timestamp>> {
        Ok(self
            .store
            .get_meta(LAST_PULL_KEY)?
            .and_then(|raw| raw.parse().ok()))
    }

    /// Fetch remote rows changed since the checkpoint (everything when
    /// `full`) and merge them last-write-wins. On full success the
    /// checkpoint moves to this pull's start time, so rows written while the
    /// pull ran are fetched again next time rather than missed.
    pub async fn pull_all(&self, full: bool) -> Result<PullReport> {
        let owner = self.identity()?;
        let started = self.clock.now_ms();
        let since = if full { None } else { self.last_pull()? };

        let _guard = self.status.begin(SyncPhase::Pull);
        match self.pull_inner(&owner, since).await {
            Ok(report) => {
                self.store.set_meta(LAST_PULL_KEY, &started.to_string())?;
                self.status.record_success(SyncPhase::Pull, started);
                debug!(
                    applied = report.applied,
                    ignored = report.ignored,
                    skipped = report.skipped,
                    "pull complete"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "pull failed");
                self.status.record_error(e.to_string());
                Err(e)
            }
        }
    }

    async fn pull_inner(&self, owner: &str, since: Option<Timestamp>) -> Result<PullReport> {
        let mut report = PullReport::default();
        for collection in Collection::SYNCED {
            let Some(table) = collection.remote_table() else {
                continue;
            };
            let rows = self
                .transport
                .select(table, owner, since)
                .await
                .map_err(|source| SyncError::Transport { collection, source })?;
            report.merge(apply_rows(&self.store, &self.changes, collection, &rows)?);
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Both
    // -----------------------------------------------------------------------

    /// Push, then pull. A failed push skips the pull.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let push = self.push_all().await?;
        let pull = self.pull_all(false).await?;
        Ok(SyncReport { push, pull })
    }
}

/// Merge `rows` of one collection, emitting one `Remote` change event for
/// the winners. Malformed rows are logged and counted, never fatal.
pub(crate) fn apply_rows(
    store: &LocalStore,
    changes: &ChangeFeed,
    collection: Collection,
    rows: &[RemoteRow],
) -> Result<PullReport> {
    let mut report = PullReport::default();
    let mut applied = Vec::new();
    for row in rows {
        match apply_remote_row(store, collection, row)? {
            RowOutcome::Applied(id) => applied.push(id),
            RowOutcome::Ignored => report.ignored += 1,
            RowOutcome::Skipped(e) => {
                warn!(collection = %collection, error = %e, "skipping malformed remote row");
                report.skipped += 1;
            }
        }
    }
    report.applied = applied.len();
    if !applied.is_empty() {
        changes.emit(&ChangeEvent::Remote {
            collection,
            ids: applied,
        });
    }
    Ok(report)
}
