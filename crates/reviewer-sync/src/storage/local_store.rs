//! LocalStore — typed record access over any `StorageBackend`.
//!
//! Converts between domain records and [`StoredRow`]s, pulling the envelope
//! and index columns out at write time. No tombstone filtering happens here:
//! callers that need live-only views go through the repository.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::types::{BoxName, Collection, Record, StoredRow, VocabItem};

use super::schema;
use super::traits::StorageBackend;

pub struct LocalStore {
    backend: Arc<dyn StorageBackend>,
}

impl LocalStore {
    /// Wrap `backend`, bringing its schema up to the latest version.
    pub fn open(backend: Arc<dyn StorageBackend>) -> Result<Self> {
        schema::upgrade(backend.as_ref())?;
        Ok(Self { backend })
    }

    /// Fresh in-memory store.
    pub fn in_memory() -> Result<Self> {
        Self::open(Arc::new(super::memory::MemoryBackend::new()))
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn schema_version(&self) -> Result<u32> {
        schema::current_version(self.backend.as_ref())
    }

    // -----------------------------------------------------------------------
    // Conversion
    // -----------------------------------------------------------------------

    fn to_row<T: Record>(collection: Collection, record: &T) -> Result<StoredRow> {
        let data = serde_json::to_value(record).map_err(|source| StorageError::Encode {
            collection: collection.name().to_string(),
            source,
        })?;
        Ok(StoredRow {
            collection,
            id: record.key().to_string(),
            data,
            updated_at: record.updated_at(),
            deleted: record.is_deleted(),
            index: record.index_fields(),
        })
    }

    fn from_row<T: Record>(row: StoredRow) -> Result<T> {
        let StoredRow {
            collection, id, data, ..
        } = row;
        serde_json::from_value::<T>(data).map_err(|source| {
            StorageError::Corruption {
                collection: collection.name().to_string(),
                id,
                source,
            }
            .into()
        })
    }

    fn decode_all<T: Record>(rows: Vec<StoredRow>) -> Result<Vec<T>> {
        rows.into_iter().map(Self::from_row).collect()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get<T: Record>(&self, collection: Collection, id: &str) -> Result<Option<T>> {
        self.backend
            .get_raw(collection, id)?
            .map(Self::from_row)
            .transpose()
    }

    /// Bulk read by id; ids with no stored record are skipped.
    pub fn get_many<T: Record>(&self, collection: Collection, ids: &[String]) -> Result<Vec<T>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(collection, id)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    /// Every record in storage order, tombstones included.
    pub fn get_all<T: Record>(&self, collection: Collection) -> Result<Vec<T>> {
        Self::decode_all(self.backend.scan_raw(collection)?)
    }

    /// Items filed under `box_name`, ordered by position. Tombstones included.
    pub fn items_in_box(&self, box_name: BoxName) -> Result<Vec<VocabItem>> {
        Self::decode_all(self.backend.scan_box_raw(box_name)?)
    }

    /// Records ordered by creation time, newest first. Tombstones included.
    pub fn newest_first<T: Record>(&self, collection: Collection) -> Result<Vec<T>> {
        Self::decode_all(self.backend.scan_created_desc_raw(collection)?)
    }

    /// Raw JSON of a stored record, for diagnostics and export.
    pub fn get_value(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        Ok(self.backend.get_raw(collection, id)?.map(|row| row.data))
    }

    pub fn count(&self, collection: Collection) -> Result<usize> {
        self.backend.count_raw(collection)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Insert or replace by id.
    pub fn put<T: Record>(&self, collection: Collection, record: &T) -> Result<()> {
        self.backend.put_raw(&Self::to_row(collection, record)?)
    }

    /// Insert or replace many records in one backend batch.
    pub fn bulk_put<T: Record>(&self, collection: Collection, records: &[T]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let rows = records
            .iter()
            .map(|r| Self::to_row(collection, r))
            .collect::<Result<Vec<_>>>()?;
        self.backend.batch_put_raw(&rows)
    }

    /// Physically remove a record. Only used by local resets.
    pub fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        self.backend.delete_raw(collection, id)
    }

    pub fn clear(&self, collection: Collection) -> Result<usize> {
        self.backend.clear_raw(collection)
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        self.backend.get_meta(key)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.backend.set_meta(key, value)
    }

    pub fn delete_meta(&self, key: &str) -> Result<()> {
        self.backend.delete_meta(key)
    }
}
