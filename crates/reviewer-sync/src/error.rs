use thiserror::Error;

use crate::sync::types::SyncTransportError;
use crate::types::Collection;

// ---------------------------------------------------------------------------
// StorageError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage corruption in {collection}/{id}: stored record could not be decoded")]
    Corruption {
        collection: String,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode record for {collection}: {source}")]
    Encode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid metadata value for \"{key}\": {message}")]
    InvalidMeta { key: String, message: String },

    #[error("Schema step v{version} failed: {message}")]
    Schema { version: u32, message: String },

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

// ---------------------------------------------------------------------------
// WireError
// ---------------------------------------------------------------------------

/// A remote row that could not be mapped onto a local record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Remote row in {table} is missing field \"{field}\"")]
    MissingField { table: &'static str, field: &'static str },

    #[error("Remote row in {table} has invalid field \"{field}\": {message}")]
    InvalidField {
        table: &'static str,
        field: &'static str,
        message: String,
    },

    #[error("Remote row in {table} has unparseable timestamp \"{value}\"")]
    InvalidTimestamp { table: &'static str, value: String },
}

// ---------------------------------------------------------------------------
// SyncError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Not signed in: no authenticated identity available")]
    NotAuthenticated,

    #[error("Remote error in {collection}: {source}")]
    Transport {
        collection: Collection,
        #[source]
        source: SyncTransportError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// MigrationError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
#[error("Legacy key \"{key}\" could not be migrated: {message}")]
pub struct MigrationError {
    pub key: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// ReviewerError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ReviewerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Invalid sync options: {0}")]
    Config(#[source] serde_json::Error),
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for ReviewerError {
    fn from(e: rusqlite::Error) -> Self {
        ReviewerError::Storage(StorageError::Sqlite(e))
    }
}

/// Convenience alias — the default error type is `ReviewerError`.
pub type Result<T, E = ReviewerError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
