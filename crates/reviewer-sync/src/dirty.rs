//! DirtyTracker — persisted `collection → {record id}` set of unflushed writes.
//!
//! The set lives in backend metadata as one JSON document, so every change is
//! a read-modify-write. All of them go through `write_lock`, which keeps two
//! rapid marks (or a mark racing a push's clear) from losing ids.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StorageError};
use crate::reactive::{EventEmitter, ListenerId};
use crate::storage::LocalStore;
use crate::types::Collection;

pub const DIRTY_KEY: &str = "sync:dirty";

pub type DirtySet = BTreeMap<Collection, BTreeSet<String>>;

/// Emitted after ids are marked dirty (unless the mark was quiet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyEvent {
    pub collection: Collection,
    pub ids: Vec<String>,
}

pub struct DirtyTracker {
    store: Arc<LocalStore>,
    write_lock: Mutex<()>,
    marks: EventEmitter<DirtyEvent>,
}

impl DirtyTracker {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
            marks: EventEmitter::new(),
        }
    }

    /// Union `ids` into the dirty set and notify mark listeners (which is
    /// what schedules the debounced push).
    pub fn mark_dirty(&self, collection: Collection, ids: &[String]) -> Result<()> {
        if !self.union(collection, ids)? {
            return Ok(());
        }
        self.marks.emit(&DirtyEvent {
            collection,
            ids: ids.to_vec(),
        });
        Ok(())
    }

    /// Like [`mark_dirty`](Self::mark_dirty) but without notifying listeners.
    /// Used for bulk imports that should sync eventually without triggering
    /// an immediate push.
    pub fn mark_dirty_quiet(&self, collection: Collection, ids: &[String]) -> Result<()> {
        self.union(collection, ids).map(|_| ())
    }

    /// Remove exactly `ids` from the collection's set. Ids marked again after
    /// a push snapshot was taken are only removed if they appear in `ids`.
    pub fn clear_dirty(&self, collection: Collection, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock();
        let mut set = self.load()?;
        let Some(current) = set.get_mut(&collection) else {
            return Ok(());
        };
        for id in ids {
            current.remove(id);
        }
        if current.is_empty() {
            set.remove(&collection);
        }
        self.save(&set)
    }

    /// Remove those of `ids` for which `unchanged` holds, checked under the
    /// write lock so a concurrent mark cannot slip between check and clear.
    /// Returns the ids that stay dirty.
    pub fn clear_unchanged(
        &self,
        collection: Collection,
        ids: &[String],
        unchanged: impl Fn(&str) -> Result<bool>,
    ) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.write_lock.lock();
        let mut set = self.load()?;
        let Some(current) = set.get_mut(&collection) else {
            return Ok(Vec::new());
        };
        let mut kept = Vec::new();
        for id in ids {
            if unchanged(id)? {
                current.remove(id);
            } else if current.contains(id) {
                kept.push(id.clone());
            }
        }
        if current.is_empty() {
            set.remove(&collection);
        }
        self.save(&set)?;
        Ok(kept)
    }

    pub fn snapshot(&self) -> Result<DirtySet> {
        let _guard = self.write_lock.lock();
        self.load()
    }

    pub fn dirty_ids(&self, collection: Collection) -> Result<Vec<String>> {
        Ok(self
            .snapshot()?
            .remove(&collection)
            .map(|ids| ids.into_iter().collect())
            .unwrap_or_default())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.snapshot()?.values().all(BTreeSet::is_empty))
    }

    /// Drop the whole set. Only for local wipes.
    pub fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.store.delete_meta(DIRTY_KEY)
    }

    pub fn on_mark(&self, callback: impl Fn(&DirtyEvent) + Send + Sync + 'static) -> ListenerId {
        self.marks.on(callback)
    }

    pub fn off_mark(&self, id: ListenerId) {
        self.marks.off(id);
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    /// Returns whether anything was written.
    fn union(&self, collection: Collection, ids: &[String]) -> Result<bool> {
        if ids.is_empty() {
            return Ok(false);
        }
        let _guard = self.write_lock.lock();
        let mut set = self.load()?;
        set.entry(collection)
            .or_default()
            .extend(ids.iter().cloned());
        self.save(&set)?;
        Ok(true)
    }

    /// An unreadable set is an error rather than an empty set: dropping it
    /// would silently lose pending uploads. [`reset`](Self::reset) clears it.
    fn load(&self) -> Result<DirtySet> {
        let Some(raw) = self.store.get_meta(DIRTY_KEY)? else {
            return Ok(DirtySet::new());
        };
        serde_json::from_str(&raw).map_err(|e| {
            StorageError::InvalidMeta {
                key: DIRTY_KEY.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    fn save(&self, set: &DirtySet) -> Result<()> {
        let raw = serde_json::to_string(set).map_err(|source| StorageError::Encode {
            collection: DIRTY_KEY.to_string(),
            source,
        })?;
        self.store.set_meta(DIRTY_KEY, &raw)
    }
}
