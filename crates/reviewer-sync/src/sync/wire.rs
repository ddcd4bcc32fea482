//! Mapping between local records and remote rows.
//!
//! Remote tables mirror the entity fields with snake_case column names,
//! ISO-8601 timestamps and an owner column (`user_id`). Settings travel as a
//! single row whose `data` column holds the whole preference map.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::error::WireError;
use crate::types::{Article, Envelope, MagicItem, Settings, Timestamp, VocabItem, SETTINGS_ID};

use super::types::RemoteRow;

pub const OWNER_COLUMN: &str = "user_id";

/// A record with a remote row representation.
pub trait WireRecord: Envelope {
    fn to_wire(&self, owner: &str) -> RemoteRow;

    /// `table` only labels errors; the shape is fixed per record type.
    fn from_wire(table: &'static str, row: &RemoteRow) -> Result<Self, WireError>;
}

// ============================================================================
// Timestamps
// ============================================================================

/// Milliseconds to an ISO-8601 UTC string with millisecond precision.
pub fn to_iso(ms: Timestamp) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an ISO-8601 timestamp. Strings without an offset are read as UTC.
pub fn parse_iso(value: &str) -> Option<Timestamp> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

// ============================================================================
// Field access
// ============================================================================

struct Fields<'a> {
    table: &'static str,
    row: &'a RemoteRow,
}

impl<'a> Fields<'a> {
    fn new(table: &'static str, row: &'a RemoteRow) -> Self {
        Self { table, row }
    }

    /// Present and not null.
    fn raw(&self, field: &'static str) -> Option<&'a Value> {
        self.row.get(field).filter(|v| !v.is_null())
    }

    fn required(&self, field: &'static str) -> Result<&'a Value, WireError> {
        self.raw(field).ok_or(WireError::MissingField {
            table: self.table,
            field,
        })
    }

    fn string(&self, field: &'static str) -> Result<String, WireError> {
        match self.required(field)? {
            Value::String(s) => Ok(s.clone()),
            other => Err(self.invalid(field, format!("expected a string, got {other}"))),
        }
    }

    fn typed<T: DeserializeOwned>(&self, field: &'static str) -> Result<T, WireError> {
        serde_json::from_value(self.required(field)?.clone())
            .map_err(|e| self.invalid(field, e.to_string()))
    }

    fn typed_or_default<T: DeserializeOwned + Default>(
        &self,
        field: &'static str,
    ) -> Result<T, WireError> {
        match self.raw(field) {
            Some(_) => self.typed(field),
            None => Ok(T::default()),
        }
    }

    fn timestamp(&self, field: &'static str) -> Result<Timestamp, WireError> {
        let raw = self.string(field)?;
        parse_iso(&raw).ok_or(WireError::InvalidTimestamp {
            table: self.table,
            value: raw,
        })
    }

    fn updated_at(&self) -> Result<Timestamp, WireError> {
        self.timestamp("updated_at")
    }

    fn deleted(&self) -> Result<bool, WireError> {
        self.typed_or_default("deleted")
    }

    fn invalid(&self, field: &'static str, message: String) -> WireError {
        WireError::InvalidField {
            table: self.table,
            field,
            message,
        }
    }
}

fn object(value: Value) -> RemoteRow {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ============================================================================
// Records
// ============================================================================

impl WireRecord for VocabItem {
    fn to_wire(&self, owner: &str) -> RemoteRow {
        object(json!({
            "id": self.id,
            "user_id": owner,
            "text": self.text,
            "lang": self.lang,
            "kind": self.kind,
            "box": self.box_name,
            "position": self.position,
            "updated_at": to_iso(self.updated_at),
            "deleted": self.deleted,
        }))
    }

    fn from_wire(table: &'static str, row: &RemoteRow) -> Result<Self, WireError> {
        let f = Fields::new(table, row);
        Ok(VocabItem {
            id: f.string("id")?,
            text: f.string("text")?,
            lang: f.typed_or_default("lang")?,
            kind: f.typed_or_default("kind")?,
            box_name: f.typed_or_default("box")?,
            position: f.typed_or_default("position")?,
            updated_at: f.updated_at()?,
            deleted: f.deleted()?,
        })
    }
}

impl WireRecord for Article {
    fn to_wire(&self, owner: &str) -> RemoteRow {
        object(json!({
            "id": self.id,
            "user_id": owner,
            "lang": self.lang,
            "raw": self.raw,
            "html": self.html,
            "used_block_ids": self.used_block_ids,
            "created_at": to_iso(self.created_at),
            "updated_at": to_iso(self.updated_at),
            "deleted": self.deleted,
        }))
    }

    fn from_wire(table: &'static str, row: &RemoteRow) -> Result<Self, WireError> {
        let f = Fields::new(table, row);
        let updated_at = f.updated_at()?;
        let created_at = match f.raw("created_at") {
            Some(_) => f.timestamp("created_at")?,
            None => updated_at,
        };
        Ok(Article {
            id: f.string("id")?,
            created_at,
            lang: f.typed_or_default("lang")?,
            raw: f.typed_or_default("raw")?,
            html: f.typed_or_default("html")?,
            used_block_ids: f.typed_or_default("used_block_ids")?,
            updated_at,
            deleted: f.deleted()?,
        })
    }
}

impl WireRecord for MagicItem {
    fn to_wire(&self, owner: &str) -> RemoteRow {
        object(json!({
            "id": self.id,
            "user_id": owner,
            "source_block_id": self.source_block_id,
            "text": self.text,
            "lang": self.lang,
            "box": self.box_name,
            "added_at": to_iso(self.added_at),
            "copied": self.copied,
            "updated_at": to_iso(self.updated_at),
            "deleted": self.deleted,
        }))
    }

    fn from_wire(table: &'static str, row: &RemoteRow) -> Result<Self, WireError> {
        let f = Fields::new(table, row);
        let updated_at = f.updated_at()?;
        let added_at = match f.raw("added_at") {
            Some(_) => f.timestamp("added_at")?,
            None => updated_at,
        };
        Ok(MagicItem {
            id: f.string("id")?,
            source_block_id: f.string("source_block_id")?,
            text: f.string("text")?,
            lang: f.typed_or_default("lang")?,
            box_name: f.typed_or_default("box")?,
            added_at,
            copied: f.typed_or_default("copied")?,
            updated_at,
            deleted: f.deleted()?,
        })
    }
}

impl WireRecord for Settings {
    fn to_wire(&self, owner: &str) -> RemoteRow {
        object(json!({
            "id": SETTINGS_ID,
            "user_id": owner,
            "data": self.values,
            "updated_at": to_iso(self.updated_at),
            "deleted": false,
        }))
    }

    fn from_wire(table: &'static str, row: &RemoteRow) -> Result<Self, WireError> {
        let f = Fields::new(table, row);
        Ok(Settings {
            values: f.typed_or_default("data")?,
            updated_at: f.updated_at()?,
        })
    }
}

/// Timestamp of a remote row, if it carries a readable one.
pub fn row_updated_at(row: &RemoteRow) -> Option<Timestamp> {
    row.get("updated_at")
        .and_then(Value::as_str)
        .and_then(parse_iso)
}

/// Id of a remote row, if present.
pub fn row_id(row: &RemoteRow) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}
