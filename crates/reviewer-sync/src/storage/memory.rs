//! MemoryBackend — a `StorageBackend` that keeps every row in process memory.
//!
//! Used by tests and by hosts that supply their own persistence. Storage
//! order is first-insertion order, tracked with a monotonically increasing
//! sequence per row so replacing a row does not move it.
//!
//! ## Lock ordering
//!
//! `rows` before `meta`. No method holds both at once today; keep it that way
//! or acquire in this order.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::Result;
use crate::types::{BoxName, Collection, StoredRow};

use super::schema::SchemaStep;
use super::traits::StorageBackend;

struct Slot {
    seq: u64,
    row: StoredRow,
}

#[derive(Default)]
struct Rows {
    next_seq: u64,
    by_collection: HashMap<Collection, HashMap<String, Slot>>,
}

impl Rows {
    fn upsert(&mut self, row: &StoredRow) {
        let next_seq = &mut self.next_seq;
        let slots = self.by_collection.entry(row.collection).or_default();
        match slots.get_mut(&row.id) {
            Some(slot) => slot.row = row.clone(),
            None => {
                *next_seq += 1;
                slots.insert(
                    row.id.clone(),
                    Slot {
                        seq: *next_seq,
                        row: row.clone(),
                    },
                );
            }
        }
    }

    /// Rows of a collection sorted by storage order.
    fn ordered(&self, collection: Collection) -> Vec<&Slot> {
        let mut slots: Vec<&Slot> = self
            .by_collection
            .get(&collection)
            .map(|m| m.values().collect())
            .unwrap_or_default();
        slots.sort_by_key(|s| s.seq);
        slots
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    rows: Mutex<Rows>,
    meta: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn apply_schema_step(&self, _step: &SchemaStep) -> Result<()> {
        Ok(())
    }

    fn get_raw(&self, collection: Collection, id: &str) -> Result<Option<StoredRow>> {
        let rows = self.rows.lock();
        Ok(rows
            .by_collection
            .get(&collection)
            .and_then(|m| m.get(id))
            .map(|s| s.row.clone()))
    }

    fn put_raw(&self, row: &StoredRow) -> Result<()> {
        self.rows.lock().upsert(row);
        Ok(())
    }

    fn batch_put_raw(&self, rows: &[StoredRow]) -> Result<()> {
        let mut guard = self.rows.lock();
        for row in rows {
            guard.upsert(row);
        }
        Ok(())
    }

    fn delete_raw(&self, collection: Collection, id: &str) -> Result<bool> {
        let mut rows = self.rows.lock();
        Ok(rows
            .by_collection
            .get_mut(&collection)
            .and_then(|m| m.remove(id))
            .is_some())
    }

    fn clear_raw(&self, collection: Collection) -> Result<usize> {
        let mut rows = self.rows.lock();
        Ok(rows
            .by_collection
            .remove(&collection)
            .map(|m| m.len())
            .unwrap_or(0))
    }

    fn scan_raw(&self, collection: Collection) -> Result<Vec<StoredRow>> {
        let rows = self.rows.lock();
        Ok(rows
            .ordered(collection)
            .into_iter()
            .map(|s| s.row.clone())
            .collect())
    }

    fn scan_box_raw(&self, box_name: BoxName) -> Result<Vec<StoredRow>> {
        let rows = self.rows.lock();
        let mut in_box: Vec<&Slot> = rows
            .ordered(Collection::Items)
            .into_iter()
            .filter(|s| s.row.index.box_name == Some(box_name))
            .collect();
        // Stable sort keeps storage order among equal positions.
        in_box.sort_by_key(|s| s.row.index.position.unwrap_or(u32::MAX));
        Ok(in_box.into_iter().map(|s| s.row.clone()).collect())
    }

    fn scan_created_desc_raw(&self, collection: Collection) -> Result<Vec<StoredRow>> {
        let rows = self.rows.lock();
        let mut slots = rows.ordered(collection);
        slots.sort_by(|a, b| b.row.index.created_at.cmp(&a.row.index.created_at));
        Ok(slots.into_iter().map(|s| s.row.clone()).collect())
    }

    fn count_raw(&self, collection: Collection) -> Result<usize> {
        let rows = self.rows.lock();
        Ok(rows.by_collection.get(&collection).map(|m| m.len()).unwrap_or(0))
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self.meta.lock().get(key).cloned())
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.meta.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_meta(&self, key: &str) -> Result<()> {
        self.meta.lock().remove(key);
        Ok(())
    }
}
