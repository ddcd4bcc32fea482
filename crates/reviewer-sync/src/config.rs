//! Tunables for the sync layer and the repository.
//!
//! Every field is optional; accessors fall back to the defaults below, so a
//! host can deserialize a partial JSON document and leave the rest alone.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, ReviewerError};

pub const DEFAULT_PUSH_DEBOUNCE_MS: u64 = 1200;
pub const DEFAULT_REALTIME_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_MAX_SAVED_ARTICLES: usize = 15;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncOptions {
    /// Quiet period after the last dirty mark before an auto-push (default 1200).
    pub push_debounce_ms: Option<u64>,
    /// Coalescing window for realtime re-render notifications (default 500).
    pub realtime_debounce_ms: Option<u64>,
    /// Live saved articles kept after each save (default 15).
    pub max_saved_articles: Option<usize>,
}

impl SyncOptions {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(ReviewerError::Config)
    }

    pub fn push_debounce(&self) -> Duration {
        Duration::from_millis(self.push_debounce_ms.unwrap_or(DEFAULT_PUSH_DEBOUNCE_MS))
    }

    pub fn realtime_debounce(&self) -> Duration {
        Duration::from_millis(
            self.realtime_debounce_ms
                .unwrap_or(DEFAULT_REALTIME_DEBOUNCE_MS),
        )
    }

    pub fn max_saved_articles(&self) -> usize {
        self.max_saved_articles
            .unwrap_or(DEFAULT_MAX_SAVED_ARTICLES)
    }
}
