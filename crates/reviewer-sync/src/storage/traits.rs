//! Storage backend trait for reviewer-sync.
//!
//! `StorageBackend` is the narrow raw I/O trait implemented by concrete
//! backends (in-memory, SQLite). Typed records and tombstone filtering live
//! one layer up in `LocalStore`.

use crate::error::Result;
use crate::storage::schema::SchemaStep;
use crate::types::{BoxName, Collection, StoredRow};

/// Raw row I/O with no record semantics.
///
/// Implementors must be `Send + Sync` so they can be shared behind an `Arc`.
/// The trait is object safe; the rest of the crate holds
/// `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Apply one additive schema step. Must be idempotent.
    fn apply_schema_step(&self, step: &SchemaStep) -> Result<()>;

    /// Fetch a single row, tombstones included.
    fn get_raw(&self, collection: Collection, id: &str) -> Result<Option<StoredRow>>;

    /// Insert or replace a row by `(collection, id)`. Replacing keeps the
    /// row's original position in storage order.
    fn put_raw(&self, row: &StoredRow) -> Result<()>;

    /// Atomically write multiple rows.
    fn batch_put_raw(&self, rows: &[StoredRow]) -> Result<()>;

    /// Physically remove a row. Returns whether it existed.
    fn delete_raw(&self, collection: Collection, id: &str) -> Result<bool>;

    /// Physically remove every row in a collection. Returns the count removed.
    fn clear_raw(&self, collection: Collection) -> Result<usize>;

    /// All rows of a collection in storage (first-insertion) order.
    fn scan_raw(&self, collection: Collection) -> Result<Vec<StoredRow>>;

    /// Item rows filed under `box_name`, ordered by `position` then storage order.
    fn scan_box_raw(&self, box_name: BoxName) -> Result<Vec<StoredRow>>;

    /// Rows of a collection ordered by `created_at` descending; ties keep
    /// storage order.
    fn scan_created_desc_raw(&self, collection: Collection) -> Result<Vec<StoredRow>>;

    /// Count rows in a collection, tombstones included.
    fn count_raw(&self, collection: Collection) -> Result<usize>;

    /// Read a metadata key-value pair (schema version, checkpoints, dirty set).
    /// A store whose meta table does not exist yet reads as `None`.
    fn get_meta(&self, key: &str) -> Result<Option<String>>;

    /// Write a metadata key-value pair.
    fn set_meta(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a metadata key. Missing keys are a no-op.
    fn delete_meta(&self, key: &str) -> Result<()>;
}
