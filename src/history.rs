use std::collections::BTreeMap;

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::datetime;
use crate::document::Document;
use crate::record::fields;

/// The user a history entry is attributed to. Always passed in explicitly;
/// the diff engine never reaches for ambient session state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActingUser {
    pub user_name: String,
    pub organisation: String,
}

impl ActingUser {
    pub fn new(user_name: &str, organisation: &str) -> Self {
        Self {
            user_name: user_name.to_string(),
            organisation: organisation.to_string(),
        }
    }
}

/// One field transition inside a history entry. Serializes with keys
/// `from` and `to`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub from: String,
    pub to: String,
}

/// One audit entry: the field-level delta between two versions of a record,
/// plus attribution and the time the entry was built. Immutable once created;
/// entries live in strict append order in the owning record's `histories`
/// field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub user_name: String,
    pub user_organisation: String,
    pub datetime: String,
    pub changes: BTreeMap<String, ChangeEntry>,
}

/// Sync bookkeeping fields are never recorded in a history entry, no matter
/// how they differ between versions.
const EXCLUDED_KEYS: [&str; 4] = [
    fields::SYNCED,
    fields::HISTORIES,
    fields::LAST_UPDATED_AT,
    fields::LAST_SYNCED_AT,
];

fn is_auditable(key: &str) -> bool {
    !EXCLUDED_KEYS.contains(&key)
}

impl History {
    /// Compares two snapshots of a record and builds the history entry
    /// describing the delta, attributed to `user` at time `at`. Returns None
    /// when nothing auditable changed; callers must not append anything in
    /// that case.
    ///
    /// Three passes over the field names:
    /// - keys in `original` that are also in `updated` with a different value
    ///   record a change,
    /// - keys in `original` missing from `updated` record a deletion to ""
    ///   unless the original value was already empty,
    /// - keys only in `updated` record an addition from "" unless the new
    ///   value is empty.
    ///
    /// Each field transition is captured exactly once, and the "empty means
    /// absent" rule keeps null-removal from producing phantom delete/add
    /// noise.
    pub fn between(
        original: &Document,
        updated: &Document,
        user: &ActingUser,
        at: NaiveDateTime,
    ) -> Option<History> {
        let mut changes = BTreeMap::new();

        for key in original.keys() {
            if !is_auditable(key) {
                continue;
            }
            let from = original.stringified(key).unwrap_or_default();
            match updated.stringified(key) {
                Some(to) => {
                    if from != to {
                        changes.insert(key.to_string(), ChangeEntry { from, to });
                    }
                }
                None => {
                    if !from.is_empty() {
                        changes.insert(
                            key.to_string(),
                            ChangeEntry {
                                from,
                                to: String::new(),
                            },
                        );
                    }
                }
            }
        }

        for key in updated.keys() {
            if !is_auditable(key) || original.contains(key) {
                continue;
            }
            let to = updated.stringified(key).unwrap_or_default();
            if !to.is_empty() {
                changes.insert(
                    key.to_string(),
                    ChangeEntry {
                        from: String::new(),
                        to,
                    },
                );
            }
        }

        if changes.is_empty() {
            return None;
        }

        Some(History {
            user_name: user.user_name.clone(),
            user_organisation: user.organisation.clone(),
            datetime: datetime::format(at),
            changes,
        })
    }

    pub fn from_value(value: &Value) -> Result<History> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
