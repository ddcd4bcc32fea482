//! ChangeEvent — what the local store just went through.
//!
//! The repository emits `Local` after each of its writes; the sync engine and
//! realtime bridge emit `Remote` after merging newer remote versions.

use crate::types::Collection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Records written through the repository (create, update, soft delete).
    Local {
        collection: Collection,
        ids: Vec<String>,
    },
    /// Remote versions that won last-write-wins and were stored locally.
    Remote {
        collection: Collection,
        ids: Vec<String>,
    },
    /// Every collection was hard-cleared.
    Wiped,
}

impl ChangeEvent {
    /// The affected collection, `None` for a wipe.
    pub fn collection(&self) -> Option<Collection> {
        match self {
            Self::Local { collection, .. } | Self::Remote { collection, .. } => Some(*collection),
            Self::Wiped => None,
        }
    }

    pub fn ids(&self) -> &[String] {
        match self {
            Self::Local { ids, .. } | Self::Remote { ids, .. } => ids,
            Self::Wiped => &[],
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }
}

/// Shared feed of store changes. Held by the repository, the sync engine and
/// the realtime bridge; observed by the UI.
pub type ChangeFeed = super::EventEmitter<ChangeEvent>;
