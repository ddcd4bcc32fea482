//! Ordered, additive schema steps for the local store.
//!
//! Each step only adds capability (tables, indexes) on top of the previous
//! versions and is safe to re-run. The applied version is tracked in backend
//! metadata under [`SCHEMA_VERSION_KEY`].

use tracing::debug;

use crate::error::{Result, StorageError};

use super::traits::StorageBackend;

pub const SCHEMA_VERSION_KEY: &str = "schema:version";

/// One schema revision. `sql` is consumed by SQL backends; backends without a
/// physical schema treat the step as bookkeeping only.
#[derive(Debug)]
pub struct SchemaStep {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static [&'static str],
}

pub const STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        description: "records and meta tables",
        sql: &[
            "CREATE TABLE IF NOT EXISTS records (
                collection  TEXT NOT NULL,
                id          TEXT NOT NULL,
                data        TEXT NOT NULL,
                updated_at  INTEGER NOT NULL DEFAULT 0,
                deleted     INTEGER NOT NULL DEFAULT 0,
                box_name    TEXT,
                position    INTEGER,
                created_at  INTEGER,
                PRIMARY KEY (collection, id)
            )",
            "CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        ],
    },
    SchemaStep {
        version: 2,
        description: "box/position index for vocabulary items",
        sql: &["CREATE INDEX IF NOT EXISTS idx_records_box_position
                ON records (collection, box_name, position)"],
    },
    SchemaStep {
        version: 3,
        description: "created_at index for articles and magic items",
        sql: &["CREATE INDEX IF NOT EXISTS idx_records_created_at
                ON records (collection, created_at)"],
    },
];

/// Latest schema version known to this build.
pub fn latest_version() -> u32 {
    STEPS.last().map(|s| s.version).unwrap_or(0)
}

/// Read the applied schema version (0 when the store is brand new).
///
/// Backends report a store without a meta table as `None`; any other read
/// failure is returned.
pub fn current_version(backend: &dyn StorageBackend) -> Result<u32> {
    match backend.get_meta(SCHEMA_VERSION_KEY)? {
        Some(v) => v.parse().map_err(|_| {
            StorageError::InvalidMeta {
                key: SCHEMA_VERSION_KEY.to_string(),
                message: format!("not a version number: {v}"),
            }
            .into()
        }),
        None => Ok(0),
    }
}

/// Apply every step newer than the stored version, in order. Returns the
/// resulting version.
pub fn upgrade(backend: &dyn StorageBackend) -> Result<u32> {
    let start = current_version(backend)?;
    let mut version = start;
    for step in STEPS.iter().filter(|s| s.version > start) {
        debug!(version = step.version, description = step.description, "applying schema step");
        backend.apply_schema_step(step)?;
        backend.set_meta(SCHEMA_VERSION_KEY, &step.version.to_string())?;
        version = step.version;
    }
    Ok(version)
}
