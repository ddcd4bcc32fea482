use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Record id of the single settings blob.
pub const SETTINGS_ID: &str = "settings";

// ============================================================================
// Collections
// ============================================================================

/// The six record collections held by the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Items,
    Articles,
    UnreadArticles,
    MagicItems,
    Settings,
    State,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Items,
        Collection::Articles,
        Collection::UnreadArticles,
        Collection::MagicItems,
        Collection::Settings,
        Collection::State,
    ];

    /// Collections mirrored to the remote backend, in push/pull order.
    pub const SYNCED: [Collection; 5] = [
        Collection::Items,
        Collection::Articles,
        Collection::UnreadArticles,
        Collection::MagicItems,
        Collection::Settings,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Items => "items",
            Collection::Articles => "articles",
            Collection::UnreadArticles => "unread_articles",
            Collection::MagicItems => "magic_items",
            Collection::Settings => "settings",
            Collection::State => "state",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Remote table backing this collection. `None` for local-only collections.
    pub fn remote_table(self) -> Option<&'static str> {
        match self {
            Collection::Items => Some("items"),
            Collection::Articles => Some("articles"),
            Collection::UnreadArticles => Some("unread_articles"),
            Collection::MagicItems => Some("magic_items"),
            Collection::Settings => Some("user_settings"),
            Collection::State => None,
        }
    }

    pub fn is_synced(self) -> bool {
        self.remote_table().is_some()
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Ja,
    En,
    #[default]
    Unknown,
}

impl Lang {
    pub fn as_str(self) -> &'static str {
        match self {
            Lang::Ja => "ja",
            Lang::En => "en",
            Lang::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Vocab,
    Grammar,
    #[default]
    Unknown,
}

/// Familiarity tier a vocabulary item is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoxName {
    #[default]
    Stash,
    Box1,
    Box2,
    Box3,
    Trash,
}

impl BoxName {
    pub const ALL: [BoxName; 5] = [
        BoxName::Stash,
        BoxName::Box1,
        BoxName::Box2,
        BoxName::Box3,
        BoxName::Trash,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BoxName::Stash => "stash",
            BoxName::Box1 => "box1",
            BoxName::Box2 => "box2",
            BoxName::Box3 => "box3",
            BoxName::Trash => "trash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.as_str() == s)
    }
}

impl fmt::Display for BoxName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the two article collections an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticleKind {
    /// User-curated, capped to the most recent N.
    Saved,
    /// AI-generated, pending review, uncapped.
    Unread,
}

impl ArticleKind {
    pub fn collection(self) -> Collection {
        match self {
            ArticleKind::Saved => Collection::Articles,
            ArticleKind::Unread => Collection::UnreadArticles,
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A word, phrase or grammar point filed in a box.
///
/// Local JSON uses camelCase so records written by older clients
/// (which may lack `updatedAt` / `deleted`) still decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub lang: Lang,
    #[serde(default)]
    pub kind: Kind,
    #[serde(rename = "box", default)]
    pub box_name: BoxName,
    #[serde(default)]
    pub position: u32,
    #[serde(default)]
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: String,
    pub created_at: Timestamp,
    #[serde(default)]
    pub lang: Lang,
    pub raw: String,
    pub html: String,
    #[serde(default)]
    pub used_block_ids: Vec<String>,
    #[serde(default)]
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted: bool,
}

/// A copy of a vocabulary item collected into the magic bag.
///
/// `source_block_id` is a weak reference: the source may since have been
/// deleted, in which case resolution yields nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MagicItem {
    pub id: String,
    pub source_block_id: String,
    pub text: String,
    #[serde(default)]
    pub lang: Lang,
    #[serde(rename = "box", default)]
    pub box_name: BoxName,
    pub added_at: Timestamp,
    #[serde(default)]
    pub copied: bool,
    #[serde(default)]
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted: bool,
}

/// The single user-preferences blob. Replaced and merged as a whole.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub values: Map<String, Value>,
    #[serde(default)]
    pub updated_at: Timestamp,
}

/// A keyed transient string that survives reloads but never leaves the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateBlob {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub updated_at: Timestamp,
}

// ============================================================================
// Record / Envelope traits
// ============================================================================

/// Secondary-index values extracted from a record at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IndexFields {
    pub box_name: Option<BoxName>,
    pub position: Option<u32>,
    pub created_at: Option<Timestamp>,
}

/// Anything the local store can persist.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Primary key within its collection.
    fn key(&self) -> &str;

    fn index_fields(&self) -> IndexFields {
        IndexFields::default()
    }

    fn updated_at(&self) -> Timestamp;

    fn is_deleted(&self) -> bool {
        false
    }
}

/// The `{id, updatedAt, deleted}` fields every synchronized entity carries,
/// made writable so the repository can stamp and tombstone records.
pub trait Envelope: Record {
    fn set_updated_at(&mut self, ts: Timestamp);
    fn set_deleted(&mut self, deleted: bool);
}

impl Record for VocabItem {
    fn key(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn index_fields(&self) -> IndexFields {
        IndexFields {
            box_name: Some(self.box_name),
            position: Some(self.position),
            created_at: None,
        }
    }
}

impl Record for Article {
    fn key(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn index_fields(&self) -> IndexFields {
        IndexFields {
            created_at: Some(self.created_at),
            ..IndexFields::default()
        }
    }
}

impl Record for MagicItem {
    fn key(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn index_fields(&self) -> IndexFields {
        IndexFields {
            created_at: Some(self.added_at),
            ..IndexFields::default()
        }
    }
}

impl Record for Settings {
    fn key(&self) -> &str {
        SETTINGS_ID
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
}

impl Record for StateBlob {
    fn key(&self) -> &str {
        &self.key
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }
}

macro_rules! impl_envelope {
    ($($ty:ty),+) => {
        $(
            impl Envelope for $ty {
                fn set_updated_at(&mut self, ts: Timestamp) {
                    self.updated_at = ts;
                }
                fn set_deleted(&mut self, deleted: bool) {
                    self.deleted = deleted;
                }
            }
        )+
    };
}

impl_envelope!(VocabItem, Article, MagicItem);

// Settings carry only a timestamp; they are never tombstoned.
impl Envelope for Settings {
    fn set_updated_at(&mut self, ts: Timestamp) {
        self.updated_at = ts;
    }
    fn set_deleted(&mut self, _deleted: bool) {}
}

// ============================================================================
// Stored rows
// ============================================================================

/// Row shape kept by a storage backend: the record JSON plus the envelope and
/// index columns pulled out for filtering and ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub collection: Collection,
    pub id: String,
    pub data: Value,
    pub updated_at: Timestamp,
    pub deleted: bool,
    pub index: IndexFields,
}

/// Input for [`crate::repository::Repository::add_vocab_items`].
#[derive(Debug, Clone, PartialEq)]
pub struct VocabDraft {
    pub text: String,
    pub lang: Lang,
    pub kind: Kind,
}

/// Generate a fresh client-side record id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
