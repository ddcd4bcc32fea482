//! Repository — the only mutation surface for the local store.
//!
//! Every write stamps `updated_at` from the injected clock, stores the
//! record, marks it dirty (which schedules the debounced push) and emits a
//! [`ChangeEvent::Local`]. Every `list_live_*` read drops tombstones.
//! Operations on ids that do not exist are no-ops, not errors.

pub mod board;

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use crate::clock::Clock;
use crate::config::SyncOptions;
use crate::dirty::DirtyTracker;
use crate::error::Result;
use crate::reactive::{ChangeEvent, ChangeFeed};
use crate::storage::LocalStore;
use crate::sync::status::SYNC_META_KEYS;
use crate::types::{
    new_id, Article, ArticleKind, BoxName, Collection, Envelope, Lang, MagicItem, Settings,
    StateBlob, Timestamp, VocabDraft, VocabItem, SETTINGS_ID,
};

pub use board::DropTarget;

/// Result of [`Repository::collect_magic_item`].
#[derive(Debug, Clone, PartialEq)]
pub enum CollectOutcome {
    Added(MagicItem),
    /// A live magic item for this source already exists; nothing was written.
    AlreadyCollected(MagicItem),
    /// The source item is missing or tombstoned.
    SourceMissing,
}

pub struct Repository {
    store: Arc<LocalStore>,
    dirty: Arc<DirtyTracker>,
    clock: Arc<dyn Clock>,
    changes: Arc<ChangeFeed>,
    max_saved_articles: usize,
}

impl Repository {
    pub fn new(
        store: Arc<LocalStore>,
        dirty: Arc<DirtyTracker>,
        clock: Arc<dyn Clock>,
        changes: Arc<ChangeFeed>,
        options: &SyncOptions,
    ) -> Self {
        Self {
            store,
            dirty,
            clock,
            changes,
            max_saved_articles: options.max_saved_articles(),
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn changes(&self) -> &Arc<ChangeFeed> {
        &self.changes
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Stamp, store, mark dirty and announce `records` as one batch.
    fn write<T: Envelope>(&self, collection: Collection, mut records: Vec<T>) -> Result<Vec<T>> {
        if records.is_empty() {
            return Ok(records);
        }
        let now = self.now();
        for record in &mut records {
            record.set_updated_at(now);
        }
        self.store.bulk_put(collection, &records)?;
        let ids: Vec<String> = records.iter().map(|r| r.key().to_string()).collect();
        self.dirty.mark_dirty(collection, &ids)?;
        self.changes.emit(&ChangeEvent::Local { collection, ids });
        Ok(records)
    }

    fn write_one<T: Envelope>(&self, collection: Collection, record: T) -> Result<T> {
        let mut written = self.write(collection, vec![record])?;
        Ok(written.remove(0))
    }

    /// Tombstone the live records among `ids`. Returns what was deleted.
    fn soft_delete_many<T: Envelope>(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<Vec<T>> {
        let live: Vec<T> = self
            .store
            .get_many::<T>(collection, ids)?
            .into_iter()
            .filter(|r| !r.is_deleted())
            .map(|mut r| {
                r.set_deleted(true);
                r
            })
            .collect();
        self.write(collection, live)
    }

    fn live<T: Envelope>(records: Vec<T>) -> Vec<T> {
        records.into_iter().filter(|r| !r.is_deleted()).collect()
    }

    // -----------------------------------------------------------------------
    // Vocabulary items
    // -----------------------------------------------------------------------

    /// Direct read, tombstones included.
    pub fn get_vocab_item(&self, id: &str) -> Result<Option<VocabItem>> {
        self.store.get(Collection::Items, id)
    }

    /// Store `item` as given (revived if it was tombstoned). Box/position
    /// consistency is the caller's concern; use
    /// [`move_vocab_item`](Self::move_vocab_item) to relocate.
    pub fn upsert_vocab_item(&self, mut item: VocabItem) -> Result<VocabItem> {
        item.deleted = false;
        self.write_one(Collection::Items, item)
    }

    /// Change the text of a live item. `None` if there is no such item.
    pub fn edit_vocab_text(&self, id: &str, text: &str) -> Result<Option<VocabItem>> {
        match self.get_vocab_item(id)? {
            Some(mut item) if !item.deleted => {
                item.text = text.to_string();
                self.write_one(Collection::Items, item).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Append freshly split drafts to the end of the stash, in order.
    pub fn add_vocab_items(&self, drafts: Vec<VocabDraft>) -> Result<Vec<VocabItem>> {
        let base = self.list_box(BoxName::Stash)?.len() as u32;
        let items = drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| VocabItem {
                id: new_id(),
                text: draft.text,
                lang: draft.lang,
                kind: draft.kind,
                box_name: BoxName::Stash,
                position: base + i as u32,
                updated_at: 0,
                deleted: false,
            })
            .collect();
        self.write(Collection::Items, items)
    }

    /// Tombstone an item and close the gap it leaves in its box.
    pub fn soft_delete_vocab_item(&self, id: &str) -> Result<bool> {
        let deleted = self.soft_delete_many::<VocabItem>(Collection::Items, &[id.to_string()])?;
        let Some(item) = deleted.first() else {
            return Ok(false);
        };
        let remaining = self.list_box(item.box_name)?;
        self.write(Collection::Items, board::resequence(&remaining))?;
        Ok(true)
    }

    /// Live items of one box ordered by position.
    pub fn list_box(&self, box_name: BoxName) -> Result<Vec<VocabItem>> {
        Ok(Self::live(self.store.items_in_box(box_name)?))
    }

    /// Every live item, box by box, each box ordered by position.
    pub fn list_live_vocab_items(&self) -> Result<Vec<VocabItem>> {
        let mut out = Vec::new();
        for box_name in BoxName::ALL {
            out.extend(self.list_box(box_name)?);
        }
        Ok(out)
    }

    /// Relocate an item per `target`. Returns every item whose box or
    /// position changed (each one stamped and marked dirty); empty for a
    /// no-op or an unknown id.
    pub fn move_vocab_item(&self, id: &str, target: DropTarget) -> Result<Vec<VocabItem>> {
        let Some(item) = self.get_vocab_item(id)?.filter(|i| !i.deleted) else {
            return Ok(Vec::new());
        };

        let (dest_box, index) = match target {
            DropTarget::EndOf(box_name) if box_name == item.box_name => return Ok(Vec::new()),
            DropTarget::EndOf(box_name) => (box_name, None),
            DropTarget::At { box_name, index } => (box_name, Some(index)),
            DropTarget::OnItem(over_id) => {
                if over_id == item.id {
                    return Ok(Vec::new());
                }
                let Some(over) = self.get_vocab_item(&over_id)?.filter(|o| !o.deleted) else {
                    return Ok(Vec::new());
                };
                let index = self
                    .list_box(over.box_name)?
                    .iter()
                    .position(|b| b.id == over.id);
                (over.box_name, index)
            }
        };

        let source = self.list_box(item.box_name)?;
        let destination = if dest_box == item.box_name {
            Vec::new()
        } else {
            self.list_box(dest_box)?
        };
        let changed = board::plan_move(&item, &source, &destination, dest_box, index);
        self.write(Collection::Items, changed)
    }

    /// Move every live stash item in Japanese or English to the end of box1,
    /// keeping their stash order, then close the gaps left in the stash.
    /// Returns how many items moved.
    pub fn auto_import_from_stash(&self) -> Result<usize> {
        let stash = self.list_box(BoxName::Stash)?;
        let (movers, stays): (Vec<VocabItem>, Vec<VocabItem>) = stash
            .into_iter()
            .partition(|b| matches!(b.lang, Lang::Ja | Lang::En));
        if movers.is_empty() {
            return Ok(0);
        }
        let base = self.list_box(BoxName::Box1)?.len() as u32;
        let moved = movers.len();

        let mut changed: Vec<VocabItem> = movers
            .into_iter()
            .enumerate()
            .map(|(i, mut b)| {
                b.box_name = BoxName::Box1;
                b.position = base + i as u32;
                b
            })
            .collect();
        changed.extend(board::resequence(&stays));
        self.write(Collection::Items, changed)?;
        Ok(moved)
    }

    // -----------------------------------------------------------------------
    // Articles
    // -----------------------------------------------------------------------

    pub fn get_article(&self, kind: ArticleKind, id: &str) -> Result<Option<Article>> {
        self.store.get(kind.collection(), id)
    }

    /// Store a saved article, then soft-delete the oldest beyond the cap.
    pub fn save_article(&self, mut article: Article) -> Result<Article> {
        article.deleted = false;
        let saved = self.write_one(Collection::Articles, article)?;
        self.trim_old_articles(self.max_saved_articles)?;
        Ok(saved)
    }

    /// Queue a generated article for review. Unread articles are uncapped.
    pub fn add_unread_article(&self, mut article: Article) -> Result<Article> {
        article.deleted = false;
        self.write_one(Collection::UnreadArticles, article)
    }

    /// Live articles, newest `created_at` first.
    pub fn list_live_articles(&self, kind: ArticleKind) -> Result<Vec<Article>> {
        Ok(Self::live(self.store.newest_first(kind.collection())?))
    }

    pub fn soft_delete_article(&self, kind: ArticleKind, id: &str) -> Result<bool> {
        Ok(!self
            .soft_delete_many::<Article>(kind.collection(), &[id.to_string()])?
            .is_empty())
    }

    /// Returns how many of `ids` were live and are now tombstoned.
    pub fn soft_delete_articles(&self, kind: ArticleKind, ids: &[String]) -> Result<usize> {
        Ok(self
            .soft_delete_many::<Article>(kind.collection(), ids)?
            .len())
    }

    /// Tombstone every live article of `kind`.
    pub fn clear_articles(&self, kind: ArticleKind) -> Result<usize> {
        let ids: Vec<String> = self
            .list_live_articles(kind)?
            .into_iter()
            .map(|a| a.id)
            .collect();
        self.soft_delete_articles(kind, &ids)
    }

    /// Keep the `max` most recent live saved articles; tombstone the rest.
    /// Among equal `created_at` values the earlier-stored one goes first.
    pub fn trim_old_articles(&self, max: usize) -> Result<usize> {
        let live = self.oldest_first(ArticleKind::Saved)?;
        if live.len() <= max {
            return Ok(0);
        }
        let excess = live.len() - max;
        let ids: Vec<String> = live.into_iter().take(excess).map(|a| a.id).collect();
        self.soft_delete_articles(ArticleKind::Saved, &ids)
    }

    /// Load-and-remove: the oldest live unread article in `lang`, which is
    /// tombstoned before being returned.
    pub fn take_oldest_unread(&self, lang: Lang) -> Result<Option<Article>> {
        let oldest = self
            .oldest_first(ArticleKind::Unread)?
            .into_iter()
            .find(|a| a.lang == lang);
        let Some(article) = oldest else {
            return Ok(None);
        };
        self.soft_delete_article(ArticleKind::Unread, &article.id)?;
        Ok(Some(article))
    }

    /// Live articles by ascending `created_at`, ties in storage order.
    fn oldest_first(&self, kind: ArticleKind) -> Result<Vec<Article>> {
        let mut live = Self::live(self.store.get_all::<Article>(kind.collection())?);
        live.sort_by_key(|a| a.created_at);
        Ok(live)
    }

    // -----------------------------------------------------------------------
    // Magic bag
    // -----------------------------------------------------------------------

    /// Copy a live vocabulary item into the magic bag, at most once per source.
    pub fn collect_magic_item(&self, source_id: &str) -> Result<CollectOutcome> {
        let Some(source) = self.get_vocab_item(source_id)?.filter(|s| !s.deleted) else {
            return Ok(CollectOutcome::SourceMissing);
        };
        if let Some(existing) = self
            .list_live_magic_items()?
            .into_iter()
            .find(|m| m.source_block_id == source.id)
        {
            return Ok(CollectOutcome::AlreadyCollected(existing));
        }
        let now = self.now();
        let item = MagicItem {
            id: new_id(),
            source_block_id: source.id,
            text: source.text,
            lang: source.lang,
            box_name: source.box_name,
            added_at: now,
            copied: false,
            updated_at: now,
            deleted: false,
        };
        self.write_one(Collection::MagicItems, item)
            .map(CollectOutcome::Added)
    }

    pub fn get_magic_item(&self, id: &str) -> Result<Option<MagicItem>> {
        self.store.get(Collection::MagicItems, id)
    }

    pub fn set_magic_copied(&self, id: &str, copied: bool) -> Result<Option<MagicItem>> {
        match self.get_magic_item(id)? {
            Some(mut item) if !item.deleted => {
                item.copied = copied;
                self.write_one(Collection::MagicItems, item).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn soft_delete_magic_item(&self, id: &str) -> Result<bool> {
        Ok(!self
            .soft_delete_many::<MagicItem>(Collection::MagicItems, &[id.to_string()])?
            .is_empty())
    }

    /// Live magic items, most recently added first.
    pub fn list_live_magic_items(&self) -> Result<Vec<MagicItem>> {
        Ok(Self::live(self.store.newest_first(Collection::MagicItems)?))
    }

    /// Follow the weak reference back to the source item. `None` when the
    /// source was deleted; that is informational, not an error.
    pub fn resolve_magic_source(&self, item: &MagicItem) -> Result<Option<VocabItem>> {
        Ok(self
            .get_vocab_item(&item.source_block_id)?
            .filter(|s| !s.deleted))
    }

    // -----------------------------------------------------------------------
    // Settings
    // -----------------------------------------------------------------------

    /// The settings blob, empty if never written.
    pub fn settings(&self) -> Result<Settings> {
        Ok(self
            .store
            .get(Collection::Settings, SETTINGS_ID)?
            .unwrap_or_default())
    }

    /// Merge `partial` into the current blob and write the whole blob.
    pub fn save_settings(&self, partial: Map<String, Value>) -> Result<Settings> {
        let mut settings = self.settings()?;
        settings.values.extend(partial);
        self.write_one(Collection::Settings, settings)
    }

    /// Overwrite the blob with exactly `values`.
    pub fn replace_settings(&self, values: Map<String, Value>) -> Result<Settings> {
        self.write_one(
            Collection::Settings,
            Settings {
                values,
                updated_at: 0,
            },
        )
    }

    // -----------------------------------------------------------------------
    // State blobs (local only, never dirty)
    // -----------------------------------------------------------------------

    pub fn get_state(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .get::<StateBlob>(Collection::State, key)?
            .map(|b| b.value))
    }

    pub fn set_state(&self, key: &str, value: &str) -> Result<()> {
        let blob = StateBlob {
            key: key.to_string(),
            value: value.to_string(),
            updated_at: self.now(),
        };
        self.store.put(Collection::State, &blob)?;
        self.changes.emit(&ChangeEvent::Local {
            collection: Collection::State,
            ids: vec![blob.key],
        });
        Ok(())
    }

    pub fn remove_state(&self, key: &str) -> Result<bool> {
        let removed = self.store.delete(Collection::State, key)?;
        if removed {
            self.changes.emit(&ChangeEvent::Local {
                collection: Collection::State,
                ids: vec![key.to_string()],
            });
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Wipe
    // -----------------------------------------------------------------------

    /// Hard-clear every collection, the dirty set and sync metadata. For
    /// account switches; nothing of this is synchronized.
    pub fn wipe_all_local_data(&self) -> Result<()> {
        let mut removed = 0;
        for collection in Collection::ALL {
            removed += self.store.clear(collection)?;
        }
        self.dirty.reset()?;
        for key in SYNC_META_KEYS {
            self.store.delete_meta(key)?;
        }
        info!(removed, "wiped all local data");
        self.changes.emit(&ChangeEvent::Wiped);
        Ok(())
    }
}
