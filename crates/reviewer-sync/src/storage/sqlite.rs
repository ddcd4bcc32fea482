//! SQLite storage backend for reviewer-sync.
//!
//! Implements `StorageBackend` using rusqlite (bundled). The connection sits
//! behind a `parking_lot::Mutex`; every method takes the lock for the
//! duration of its statements only.

use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::types::{BoxName, Collection, IndexFields, StoredRow};

use super::schema::SchemaStep;
use super::traits::StorageBackend;

const SELECT_COLUMNS: &str =
    "collection, id, data, updated_at, deleted, box_name, position, created_at";

/// Column values exactly as read from SQLite, before decoding.
struct RawRow {
    collection: String,
    id: String,
    data: String,
    updated_at: i64,
    deleted: bool,
    box_name: Option<String>,
    position: Option<i64>,
    created_at: Option<i64>,
}

impl RawRow {
    fn from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            collection: row.get(0)?,
            id: row.get(1)?,
            data: row.get(2)?,
            updated_at: row.get(3)?,
            deleted: row.get::<_, i64>(4)? != 0,
            box_name: row.get(5)?,
            position: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn decode(self) -> Result<StoredRow> {
        let collection = Collection::from_name(&self.collection).ok_or_else(|| {
            StorageError::Backend(format!("unknown collection \"{}\"", self.collection))
        })?;
        let data: Value =
            serde_json::from_str(&self.data).map_err(|source| StorageError::Corruption {
                collection: self.collection.clone(),
                id: self.id.clone(),
                source,
            })?;
        Ok(StoredRow {
            collection,
            id: self.id,
            data,
            updated_at: self.updated_at,
            deleted: self.deleted,
            index: IndexFields {
                box_name: self.box_name.as_deref().and_then(BoxName::parse),
                position: self.position.and_then(|p| u32::try_from(p).ok()),
                created_at: self.created_at,
            },
        })
    }
}

/// SQLite storage backend.
pub struct SqliteBackend {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteBackend {
    /// Open a file-backed SQLite database.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query_rows(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<StoredRow>> {
        let raw = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(sql)?;
            let rows = stmt.query_map(params, RawRow::from_sql)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        raw.into_iter().map(RawRow::decode).collect()
    }

    fn upsert(conn: &rusqlite::Connection, row: &StoredRow) -> Result<()> {
        let data = serde_json::to_string(&row.data).map_err(|source| StorageError::Encode {
            collection: row.collection.name().to_string(),
            source,
        })?;
        conn.prepare_cached(
            "INSERT INTO records
                (collection, id, data, updated_at, deleted, box_name, position, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(collection, id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at,
                deleted = excluded.deleted,
                box_name = excluded.box_name,
                position = excluded.position,
                created_at = excluded.created_at",
        )?
        .execute(params![
            row.collection.name(),
            row.id,
            data,
            row.updated_at,
            row.deleted as i64,
            row.index.box_name.map(BoxName::as_str),
            row.index.position.map(i64::from),
            row.index.created_at,
        ])?;
        Ok(())
    }
}

impl StorageBackend for SqliteBackend {
    fn apply_schema_step(&self, step: &SchemaStep) -> Result<()> {
        let conn = self.conn.lock();
        for sql in step.sql {
            conn.execute_batch(sql).map_err(|e| StorageError::Schema {
                version: step.version,
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn get_raw(&self, collection: Collection, id: &str) -> Result<Option<StoredRow>> {
        let raw = {
            let conn = self.conn.lock();
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM records WHERE collection = ?1 AND id = ?2"),
                params![collection.name(), id],
                RawRow::from_sql,
            )
            .optional()?
        };
        raw.map(RawRow::decode).transpose()
    }

    fn put_raw(&self, row: &StoredRow) -> Result<()> {
        let conn = self.conn.lock();
        Self::upsert(&conn, row)
    }

    fn batch_put_raw(&self, rows: &[StoredRow]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for row in rows {
            Self::upsert(&tx, row)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_raw(&self, collection: Collection, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection.name(), id],
        )?;
        Ok(n > 0)
    }

    fn clear_raw(&self, collection: Collection) -> Result<usize> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM records WHERE collection = ?1",
            params![collection.name()],
        )?;
        Ok(n)
    }

    fn scan_raw(&self, collection: Collection) -> Result<Vec<StoredRow>> {
        self.query_rows(
            &format!("SELECT {SELECT_COLUMNS} FROM records WHERE collection = ?1 ORDER BY rowid"),
            &[&collection.name()],
        )
    }

    fn scan_box_raw(&self, box_name: BoxName) -> Result<Vec<StoredRow>> {
        self.query_rows(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM records
                 WHERE collection = ?1 AND box_name = ?2
                 ORDER BY position, rowid"
            ),
            &[&Collection::Items.name(), &box_name.as_str()],
        )
    }

    fn scan_created_desc_raw(&self, collection: Collection) -> Result<Vec<StoredRow>> {
        self.query_rows(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM records
                 WHERE collection = ?1
                 ORDER BY created_at DESC, rowid"
            ),
            &[&collection.name()],
        )
    }

    fn count_raw(&self, collection: Collection) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            params![collection.name()],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional();
        match value {
            Ok(value) => Ok(value),
            // Before schema v1 there is no meta table to read from.
            Err(rusqlite::Error::SqliteFailure(_, Some(message)))
                if message.starts_with("no such table") =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete_meta(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM meta WHERE key = ?1", params![key])?;
        Ok(())
    }
}
