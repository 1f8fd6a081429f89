use anyhow::Result;
use chrono::NaiveDateTime;
use serde_json::Value;
use uuid::Uuid;

use crate::datetime;
use crate::document::Document;
use crate::history::History;

/// Reserved field names with system meaning.
pub mod fields {
    pub const UNIQUE_IDENTIFIER: &str = "unique_identifier";
    pub const INTERNAL_ID: &str = "internal_id";
    /// Server payloads carry the internal id under this key.
    pub const WIRE_INTERNAL_ID: &str = "_id";
    pub const CREATED_BY: &str = "created_by";
    pub const CREATED_ORGANISATION: &str = "created_organisation";
    pub const CREATED_AT: &str = "created_at";
    pub const SYNCED: &str = "synced";
    pub const LAST_UPDATED_AT: &str = "last_updated_at";
    pub const LAST_SYNCED_AT: &str = "last_synced_at";
    pub const HISTORIES: &str = "histories";
}

/// One domain entity: a document plus sync and audit metadata, accessed
/// through typed accessors rather than by reaching into the raw field map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    doc: Document,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deserializes a record from its wire representation, failing fast on
    /// malformed payloads. The server's `_id` key is folded into
    /// `internal_id`, and a string-typed `synced` flag left behind by older
    /// clients is normalized to a strict boolean.
    pub fn from_value(value: Value) -> Result<Record> {
        let mut doc = Document::from_value(value)?;

        if let Some(id) = doc.remove(fields::WIRE_INTERNAL_ID) {
            if !doc.contains(fields::INTERNAL_ID) {
                doc.set(fields::INTERNAL_ID, id)?;
            }
        }

        if let Some(Value::String(flag)) = doc.get(fields::SYNCED).cloned() {
            doc.set(fields::SYNCED, Value::Bool(flag == "true"))?;
        }

        Ok(Record { doc })
    }

    pub fn from_json(source: &str) -> Result<Record> {
        Self::from_value(serde_json::from_str(source)?)
    }

    /// Read-only view of the underlying document, used as the point-in-time
    /// snapshot handed to the diff builder.
    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.doc.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        self.doc.set(key, value)
    }

    pub fn unique_id(&self) -> Option<&str> {
        self.doc.get(fields::UNIQUE_IDENTIFIER).and_then(Value::as_str)
    }

    /// Assigns a client-generated identity exactly once. An existing
    /// identifier is never regenerated.
    pub fn ensure_unique_id(&mut self) -> Result<String> {
        if let Some(existing) = self.unique_id() {
            return Ok(existing.to_string());
        }
        let id = Uuid::now_v7().to_string();
        self.doc
            .set(fields::UNIQUE_IDENTIFIER, Value::String(id.clone()))?;
        Ok(id)
    }

    /// The server-assigned identity. Absent until the first successful push.
    pub fn internal_id(&self) -> Option<&str> {
        self.doc.get(fields::INTERNAL_ID).and_then(Value::as_str)
    }

    pub fn set_internal_id(&mut self, id: &str) -> Result<()> {
        self.doc
            .set(fields::INTERNAL_ID, Value::String(id.to_string()))
    }

    pub fn created_by(&self) -> Option<&str> {
        self.doc.get(fields::CREATED_BY).and_then(Value::as_str)
    }

    pub fn set_created_by(&mut self, user_name: &str) -> Result<()> {
        self.doc
            .set(fields::CREATED_BY, Value::String(user_name.to_string()))
    }

    pub fn created_at(&self) -> Option<&str> {
        self.doc.get(fields::CREATED_AT).and_then(Value::as_str)
    }

    /// Stamps the creation timestamp unless the payload already carried one.
    pub fn ensure_created_at(&mut self, at: NaiveDateTime) -> Result<()> {
        if self.created_at().is_none() {
            self.doc
                .set(fields::CREATED_AT, Value::String(datetime::format(at)))?;
        }
        Ok(())
    }

    pub fn synced(&self) -> bool {
        matches!(self.doc.get(fields::SYNCED), Some(Value::Bool(true)))
    }

    pub fn set_synced(&mut self, synced: bool) -> Result<()> {
        self.doc.set(fields::SYNCED, Value::Bool(synced))
    }

    pub fn last_updated_at(&self) -> Option<&str> {
        self.doc.get(fields::LAST_UPDATED_AT).and_then(Value::as_str)
    }

    pub fn last_synced_at(&self) -> Option<&str> {
        self.doc.get(fields::LAST_SYNCED_AT).and_then(Value::as_str)
    }

    /// Marks a local edit at the given time. The record becomes dirty until
    /// the next successful sync.
    pub fn touch(&mut self, at: NaiveDateTime) -> Result<()> {
        self.doc
            .set(fields::LAST_UPDATED_AT, Value::String(datetime::format(at)))?;
        self.set_synced(false)
    }

    /// Marks a successful sync at the given time.
    pub fn mark_synced(&mut self, at: NaiveDateTime) -> Result<()> {
        self.doc
            .set(fields::LAST_SYNCED_AT, Value::String(datetime::format(at)))?;
        self.set_synced(true)
    }

    /// A record is dirty when its local edits postdate its last successful
    /// sync, or when it has never synced at all. The canonical timestamp
    /// format sorts lexicographically, so plain string comparison is enough.
    pub fn is_dirty(&self) -> bool {
        match (self.last_updated_at(), self.last_synced_at()) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(updated), Some(synced)) => updated > synced,
        }
    }

    /// Appends one history entry to the audit trail, creating the `histories`
    /// field if absent. Entries are kept in strict chronological append
    /// order; nothing is ever reordered or deduplicated.
    pub fn add_history(&mut self, history: History) -> Result<()> {
        self.doc.push_to_array(fields::HISTORIES, history.to_value()?)
    }

    /// The audit trail in append order. Fails on malformed entries rather
    /// than silently skipping them.
    pub fn histories(&self) -> Result<Vec<History>> {
        match self.doc.get(fields::HISTORIES) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().map(History::from_value).collect(),
            Some(other) => Err(anyhow::anyhow!(
                "histories field holds a non-array value: {}",
                other
            )),
        }
    }

    pub fn to_value(&self) -> Value {
        self.doc.to_value()
    }

    pub fn to_json(&self) -> String {
        self.doc.to_json()
    }
}
