//! LegacyMigrator — one-shot import of flat key/value state.
//!
//! Older clients kept everything under fixed string keys. The migrator reads
//! each known key, parses it into the matching collection and writes it
//! straight to the store. Imported records are marked dirty quietly, so they
//! sync with the next push without triggering one.
//!
//! A malformed key is logged and skipped; the rest still migrate. The
//! completion flag is written whatever happened, so the import runs at most
//! once. A crash before the flag lands reruns it next time, which is safe
//! because every write is an idempotent put.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::dirty::DirtyTracker;
use crate::error::{MigrationError, Result};
use crate::storage::LocalStore;
use crate::types::{Collection, Envelope, MagicItem, Settings, StateBlob, VocabItem, SETTINGS_ID};

pub const LEGACY_DONE_KEY: &str = "migration:legacy:done";

pub const BLOCKS_KEY: &str = "reviewer.blocks.v1";
pub const MAGIC_BAG_KEY: &str = "reviewer.magicBag.v1";

/// Legacy key, settings field, default when the key is absent.
pub const SETTINGS_KEYS: &[(&str, &str, Option<&str>)] = &[
    ("reviewer.reader.config.v1", "readerConfig", None),
    ("reviewer.magicBag.filter", "magicFilter", Some("all")),
    ("reviewer.magicBag.order", "magicOrder", Some("newest")),
    ("reviewer.magicBag.includeCopied", "magicIncludeCopied", Some("1")),
    ("reviewer.lastLang", "lastLang", None),
    ("reviewer.loadLang", "loadLang", None),
    ("reviewer.gemini.model", "geminiModel", None),
];

/// Parsed as JSON rather than stored as a string.
const JSON_SETTINGS_KEY: &str = "reviewer.reader.config.v1";

pub const STATE_KEYS: &[&str] = &[
    "reviewer.gen.history",
    "reviewer.batch.v1",
    "reviewer.currentArticle.v1",
];

/// Where legacy values live (browser storage, a settings file, ...).
pub trait LegacySource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn remove(&self, key: &str);
}

/// A `LegacySource` backed by a map, for hosts that load legacy state
/// themselves and for tests.
#[derive(Debug, Default)]
pub struct MapLegacySource {
    values: Mutex<HashMap<String, String>>,
}

impl MapLegacySource {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values: Mutex::new(values),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }
}

impl LegacySource for MapLegacySource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn remove(&self, key: &str) {
        self.values.lock().remove(key);
    }
}

#[derive(Debug, Default)]
pub struct MigrationReport {
    /// The completion flag was already set; nothing ran.
    pub already_done: bool,
    pub items: usize,
    pub magic_items: usize,
    pub settings_fields: usize,
    pub state_keys: usize,
    /// Keys that were present but could not be migrated.
    pub errors: Vec<MigrationError>,
}

pub struct LegacyMigrator {
    store: Arc<LocalStore>,
    dirty: Arc<DirtyTracker>,
    clock: Arc<dyn Clock>,
}

impl LegacyMigrator {
    pub fn new(store: Arc<LocalStore>, dirty: Arc<DirtyTracker>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            dirty,
            clock,
        }
    }

    pub fn is_done(&self) -> Result<bool> {
        Ok(self.store.get_meta(LEGACY_DONE_KEY)?.is_some())
    }

    pub fn run(&self, source: &dyn LegacySource) -> Result<MigrationReport> {
        if self.is_done()? {
            return Ok(MigrationReport {
                already_done: true,
                ..MigrationReport::default()
            });
        }

        let mut report = MigrationReport::default();
        self.migrate_all(source, &mut report);
        self.store
            .set_meta(LEGACY_DONE_KEY, &self.clock.now_ms().to_string())?;

        info!(
            items = report.items,
            magic_items = report.magic_items,
            settings_fields = report.settings_fields,
            state_keys = report.state_keys,
            failed = report.errors.len(),
            "legacy migration finished"
        );
        Ok(report)
    }

    fn migrate_all(&self, source: &dyn LegacySource, report: &mut MigrationReport) {
        let mut errors: Vec<(&str, String)> = Vec::new();

        match self.import_list::<VocabItem>(source, BLOCKS_KEY, Collection::Items) {
            Ok(n) => {
                report.items = n;
                source.remove(BLOCKS_KEY);
            }
            Err(message) => errors.push((BLOCKS_KEY, message)),
        }
        match self.import_list::<MagicItem>(source, MAGIC_BAG_KEY, Collection::MagicItems) {
            Ok(n) => report.magic_items = n,
            Err(message) => errors.push((MAGIC_BAG_KEY, message)),
        }

        let (fields, settings_errors) = self.import_settings(source);
        report.settings_fields = fields;
        errors.extend(settings_errors);

        for &key in STATE_KEYS {
            match self.import_state(source, key) {
                Ok(true) => report.state_keys += 1,
                Ok(false) => {}
                Err(message) => errors.push((key, message)),
            }
        }

        for (key, message) in errors {
            warn!(key, error = %message, "legacy key skipped");
            report.errors.push(MigrationError {
                key: key.to_string(),
                message,
            });
        }
    }

    /// Import a JSON array of records. Records without a timestamp are
    /// stamped with the current time so they win over nothing remotely.
    fn import_list<T: Envelope>(
        &self,
        source: &dyn LegacySource,
        key: &str,
        collection: Collection,
    ) -> std::result::Result<usize, String> {
        let Some(raw) = source.get(key) else {
            return Ok(0);
        };
        let mut records: Vec<T> = serde_json::from_str(&raw).map_err(|e| e.to_string())?;
        let now = self.clock.now_ms();
        for record in &mut records {
            if record.updated_at() == 0 {
                record.set_updated_at(now);
            }
        }
        let ids: Vec<String> = records.iter().map(|r| r.key().to_string()).collect();
        self.store
            .bulk_put(collection, &records)
            .and_then(|()| self.dirty.mark_dirty_quiet(collection, &ids))
            .map_err(|e| e.to_string())?;
        Ok(records.len())
    }

    /// Merge every present (or defaulted) settings key into the blob.
    fn import_settings(&self, source: &dyn LegacySource) -> (usize, Vec<(&'static str, String)>) {
        let mut errors = Vec::new();
        let mut partial = Map::new();
        for &(key, field, default) in SETTINGS_KEYS {
            let raw = source.get(key).filter(|v| !v.is_empty());
            let value = match (raw, default) {
                (Some(raw), _) if key == JSON_SETTINGS_KEY => match serde_json::from_str(&raw) {
                    Ok(v) => v,
                    Err(e) => {
                        errors.push((key, e.to_string()));
                        continue;
                    }
                },
                (Some(raw), _) => Value::String(raw),
                (None, Some(default)) => Value::String(default.to_string()),
                (None, None) => continue,
            };
            partial.insert(field.to_string(), value);
        }

        let fields = partial.len();
        if fields == 0 {
            return (0, errors);
        }
        if let Err(e) = self.write_settings(partial) {
            errors.push((SETTINGS_KEYS[0].0, e.to_string()));
            return (0, errors);
        }
        (fields, errors)
    }

    fn write_settings(&self, partial: Map<String, Value>) -> Result<()> {
        let mut settings: Settings = self
            .store
            .get(Collection::Settings, SETTINGS_ID)?
            .unwrap_or_default();
        settings.values.extend(partial);
        settings.updated_at = self.clock.now_ms();
        self.store.put(Collection::Settings, &settings)?;
        self.dirty
            .mark_dirty_quiet(Collection::Settings, &[SETTINGS_ID.to_string()])
    }

    fn import_state(
        &self,
        source: &dyn LegacySource,
        key: &str,
    ) -> std::result::Result<bool, String> {
        let Some(value) = source.get(key) else {
            return Ok(false);
        };
        let blob = StateBlob {
            key: key.to_string(),
            value,
            updated_at: self.clock.now_ms(),
        };
        self.store
            .put(Collection::State, &blob)
            .map_err(|e| e.to_string())?;
        Ok(true)
    }
}
