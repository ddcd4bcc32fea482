//! Sync-specific types: transport and identity traits, transport errors and
//! the reports returned by push/pull.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::types::{Collection, Timestamp};

/// One row in the remote wire shape: snake_case columns, ISO-8601
/// `updated_at`, `user_id` owner column and `deleted`.
pub type RemoteRow = Map<String, Value>;

// ============================================================================
// SyncTransport — user-provided network layer
// ============================================================================

/// User-implemented access to the remote relational backend.
///
/// Every table is keyed by `id` and scoped to the owning identity via the
/// `user_id` column the engine writes into each row.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Insert-or-replace `rows` in `table`, keyed by `id`.
    async fn upsert(&self, table: &str, rows: &[RemoteRow]) -> Result<(), SyncTransportError>;

    /// Rows of `table` owned by `owner`. With `since`, only rows whose
    /// `updated_at` is at or after that instant.
    async fn select(
        &self,
        table: &str,
        owner: &str,
        since: Option<Timestamp>,
    ) -> Result<Vec<RemoteRow>, SyncTransportError>;
}

/// Source of the authenticated identity. `None` means signed out, in which
/// case push and pull refuse to run.
pub trait AuthProvider: Send + Sync {
    fn current_identity(&self) -> Option<String>;
}

/// An `AuthProvider` the host updates on sign-in / sign-out.
#[derive(Debug, Default)]
pub struct SharedIdentity {
    identity: RwLock<Option<String>>,
}

impl SharedIdentity {
    pub fn new(identity: Option<String>) -> Self {
        Self {
            identity: RwLock::new(identity),
        }
    }

    pub fn set(&self, identity: impl Into<String>) {
        *self.identity.write() = Some(identity.into());
    }

    pub fn clear(&self) {
        *self.identity.write() = None;
    }
}

impl AuthProvider for SharedIdentity {
    fn current_identity(&self) -> Option<String> {
        self.identity.read().clone()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Transport-level error (wraps arbitrary error strings from the transport layer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTransportError {
    pub message: String,
    pub kind: SyncErrorKind,
}

impl SyncTransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: SyncErrorKind::Transient,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: SyncErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl std::fmt::Display for SyncTransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SyncTransportError {}

/// Classification of transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncErrorKind {
    /// Retriable (network, temporary failures)
    Transient,
    /// Not retriable (validation, constraint violations)
    Permanent,
    /// Authentication failed or expired
    Auth,
    /// Rate limit or quota exceeded
    Capacity,
}

impl SyncErrorKind {
    /// Whether the next triggering event may reasonably retry.
    pub fn is_retryable(self) -> bool {
        !matches!(self, SyncErrorKind::Permanent)
    }
}

/// Which operation a status transition or error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Push,
    Pull,
}

// ============================================================================
// Reports
// ============================================================================

/// Outcome of a successful push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Rows upserted per collection.
    pub pushed: BTreeMap<Collection, usize>,
    /// Dirty ids cleared whose local record no longer existed.
    pub missing: usize,
}

impl PushReport {
    pub fn total(&self) -> usize {
        self.pushed.values().sum()
    }

    pub fn pushed_in(&self, collection: Collection) -> usize {
        self.pushed.get(&collection).copied().unwrap_or(0)
    }
}

/// Outcome of applying remote rows, from a pull or realtime events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Remote versions that won and were stored.
    pub applied: usize,
    /// Remote versions that lost (or tied) against local state.
    pub ignored: usize,
    /// Rows that could not be mapped onto a local record.
    pub skipped: usize,
}

impl PullReport {
    pub fn merge(&mut self, other: PullReport) {
        self.applied += other.applied;
        self.ignored += other.ignored;
        self.skipped += other.skipped;
    }

    pub fn total(&self) -> usize {
        self.applied + self.ignored + self.skipped
    }
}

/// Outcome of [`crate::sync::SyncEngine::sync_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub push: PushReport,
    pub pull: PullReport,
}
