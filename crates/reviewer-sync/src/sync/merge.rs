//! The last-write-wins merge primitive shared by pull and realtime.
//!
//! A remote version replaces the local one only when its timestamp is
//! strictly greater; ties keep local state. A missing local record counts as
//! timestamp 0, except that a remote tombstone with no local counterpart is
//! ignored (nothing to delete). Winning versions are stored exactly as
//! received and are never marked dirty.

use crate::error::{Result, WireError};
use crate::storage::LocalStore;
use crate::types::{Article, Collection, Envelope, MagicItem, Settings, Timestamp, VocabItem};

use super::types::RemoteRow;
use super::wire::WireRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The remote version was stored.
    Applied,
    /// Local state was kept.
    Ignored,
}

/// Whether a remote version at `remote` beats local state at `local`.
pub fn remote_wins(local: Option<Timestamp>, remote: Timestamp) -> bool {
    remote > local.unwrap_or(0)
}

pub fn apply_if_newer<T: Envelope>(
    store: &LocalStore,
    collection: Collection,
    remote: &T,
) -> Result<MergeOutcome> {
    let local: Option<T> = store.get(collection, remote.key())?;
    if local.is_none() && remote.is_deleted() {
        return Ok(MergeOutcome::Ignored);
    }
    if !remote_wins(local.as_ref().map(|l| l.updated_at()), remote.updated_at()) {
        return Ok(MergeOutcome::Ignored);
    }
    store.put(collection, remote)?;
    Ok(MergeOutcome::Applied)
}

/// What became of one remote row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    /// Stored; carries the record id.
    Applied(String),
    Ignored,
    /// The row could not be mapped onto a local record.
    Skipped(WireError),
}

/// Decode a remote row of `collection` and merge it. Rows for local-only
/// collections are ignored.
pub fn apply_remote_row(
    store: &LocalStore,
    collection: Collection,
    row: &RemoteRow,
) -> Result<RowOutcome> {
    match collection {
        Collection::Items => apply_typed::<VocabItem>(store, collection, row),
        Collection::Articles | Collection::UnreadArticles => {
            apply_typed::<Article>(store, collection, row)
        }
        Collection::MagicItems => apply_typed::<MagicItem>(store, collection, row),
        Collection::Settings => apply_typed::<Settings>(store, collection, row),
        Collection::State => Ok(RowOutcome::Ignored),
    }
}

fn apply_typed<T: WireRecord>(
    store: &LocalStore,
    collection: Collection,
    row: &RemoteRow,
) -> Result<RowOutcome> {
    let table = collection.remote_table().unwrap_or("state");
    let remote = match T::from_wire(table, row) {
        Ok(remote) => remote,
        Err(e) => return Ok(RowOutcome::Skipped(e)),
    };
    Ok(match apply_if_newer(store, collection, &remote)? {
        MergeOutcome::Applied => RowOutcome::Applied(remote.key().to_string()),
        MergeOutcome::Ignored => RowOutcome::Ignored,
    })
}

/// Tombstone the local record in place, keeping its timestamp. Used for
/// remote hard deletes, which carry no version to compare against.
pub fn tombstone_in_place(
    store: &LocalStore,
    collection: Collection,
    id: &str,
) -> Result<RowOutcome> {
    match collection {
        Collection::Items => tombstone_typed::<VocabItem>(store, collection, id),
        Collection::Articles | Collection::UnreadArticles => {
            tombstone_typed::<Article>(store, collection, id)
        }
        Collection::MagicItems => tombstone_typed::<MagicItem>(store, collection, id),
        // The settings blob is never tombstoned.
        Collection::Settings | Collection::State => Ok(RowOutcome::Ignored),
    }
}

fn tombstone_typed<T: Envelope>(
    store: &LocalStore,
    collection: Collection,
    id: &str,
) -> Result<RowOutcome> {
    match store.get::<T>(collection, id)? {
        Some(mut local) if !local.is_deleted() => {
            local.set_deleted(true);
            store.put(collection, &local)?;
            Ok(RowOutcome::Applied(id.to_string()))
        }
        _ => Ok(RowOutcome::Ignored),
    }
}
