use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::NaiveDateTime;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::datetime;
use crate::document::Document;
use crate::history::{ActingUser, History};
use crate::record::{fields, Record};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),
    #[error("remote conflict: {0}")]
    Conflict(String),
    #[error("remote rejected record: {0}")]
    Validation(String),
    #[error("identity conflict for '{unique_id}': bound to '{bound}', remote reported '{reported}'")]
    IdentityConflict {
        unique_id: String,
        bound: String,
        reported: String,
    },
}

impl SyncError {
    /// Retryable errors leave the record dirty and untouched; the next sync
    /// pass picks it up again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }
}

/// The remote store's answer to a successful push.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushReceipt {
    pub internal_id: String,
    pub timestamp: String,
}

/// Narrow contract to the remote authority. Transport, authentication, and
/// request construction live behind this seam.
pub trait RemoteClient {
    fn push(&self, record_type: &str, record: &Value) -> Result<PushReceipt, SyncError>;
    fn pull_all(&self, record_type: &str) -> Result<Vec<Value>, SyncError>;
    fn delete_all(&self, record_type: &str) -> Result<(), SyncError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The record was dirty and is now acknowledged by the remote store.
    Pushed,
    /// The record was already in sync; no network call was made.
    Clean,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Remote fields differed; a history entry was appended.
    Changed,
    /// Local and remote already agreed on every auditable field.
    Unchanged,
}

/// Drives one record at a time through the push/pull cycle. Within a record,
/// push strictly precedes pull so a just-pushed local edit is never clobbered
/// by a stale remote copy.
pub struct SyncReconciler<'a> {
    remote: &'a dyn RemoteClient,
    user: ActingUser,
    record_type: String,
}

impl<'a> SyncReconciler<'a> {
    pub fn new(remote: &'a dyn RemoteClient, user: ActingUser, record_type: &str) -> Self {
        Self {
            remote,
            user,
            record_type: record_type.to_string(),
        }
    }

    /// Pushes a dirty record to the remote store. On success the record gains
    /// its server identity (first push only), `synced` and `last_synced_at`.
    /// Dirtiness gates everything: a clean record returns without any network
    /// call. On failure the record is left exactly as it was.
    pub fn push(&self, record: &mut Record, now: NaiveDateTime) -> Result<PushOutcome> {
        let unique_id = record
            .unique_id()
            .ok_or_else(|| anyhow::anyhow!("Record missing required 'unique_identifier' field"))?
            .to_string();

        if !record.is_dirty() {
            log::debug!("PUSH SKIP: record '{}' is clean", unique_id);
            return Ok(PushOutcome::Clean);
        }

        log::info!("Pushing record '{}'", unique_id);
        let receipt = self.remote.push(&self.record_type, &record.to_value())?;

        match record.internal_id() {
            Some(bound) if bound != receipt.internal_id => {
                return Err(SyncError::IdentityConflict {
                    unique_id,
                    bound: bound.to_string(),
                    reported: receipt.internal_id,
                }
                .into());
            }
            Some(_) => {}
            None => record.set_internal_id(&receipt.internal_id)?,
        }

        record.mark_synced(now)?;
        Ok(PushOutcome::Pushed)
    }

    /// Merges a remote representation into the local record. The field-level
    /// delta is captured as a history entry attributed to the synchronizing
    /// actor, then remote values overwrite local fields. Local bookkeeping
    /// (`synced`, `last_synced_at`) is never taken from the remote side. The
    /// audit trail is imported from the remote payload only when the local
    /// record has none yet (first adoption); after that the local trail is
    /// append-only and a remote copy can neither rewrite nor truncate it.
    pub fn pull(
        &self,
        record: &mut Record,
        remote: &Document,
        now: NaiveDateTime,
    ) -> Result<MergeOutcome> {
        let history = History::between(record.document(), remote, &self.user, now);
        let keep_local_trail = record.document().contains(fields::HISTORIES);

        let local_keys: Vec<String> = record
            .document()
            .keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        for key in local_keys {
            if is_locally_owned(&key) || key == fields::HISTORIES {
                continue;
            }
            if !remote.contains(&key) {
                record.set(&key, Value::Null)?;
            }
        }
        for key in remote.keys() {
            if is_locally_owned(key) || (key == fields::HISTORIES && keep_local_trail) {
                continue;
            }
            let value = remote.get(key).cloned().unwrap_or(Value::Null);
            record.set(key, value)?;
        }

        let outcome = match history {
            Some(history) => {
                record.add_history(history)?;
                MergeOutcome::Changed
            }
            None => MergeOutcome::Unchanged,
        };

        record.mark_synced(now)?;
        Ok(outcome)
    }
}

fn is_locally_owned(key: &str) -> bool {
    key == fields::SYNCED || key == fields::LAST_SYNCED_AT
}

/// Shared-map remote double: behaves like the server for tests and demos.
/// Identity assignment is idempotent per `unique_identifier`, so a retry
/// after a lost acknowledgement never creates a duplicate remote record.
pub struct InMemoryRemote {
    data: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plants a record server-side, as if another client had pushed it.
    /// Returns the assigned internal id.
    pub fn seed(&self, record_type: &str, record: Value) -> Result<String, SyncError> {
        let receipt = self.push(record_type, &record)?;
        Ok(receipt.internal_id)
    }

    fn path(record_type: &str, unique_id: &str) -> String {
        format!("{}/{}", record_type, unique_id)
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Clone for InMemoryRemote {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl RemoteClient for InMemoryRemote {
    fn push(&self, record_type: &str, record: &Value) -> Result<PushReceipt, SyncError> {
        let Some(object) = record.as_object() else {
            return Err(SyncError::Validation(
                "record is not a JSON object".to_string(),
            ));
        };
        let unique_id = object
            .get(fields::UNIQUE_IDENTIFIER)
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Validation("record has no unique_identifier".to_string()))?;
        let path = Self::path(record_type, unique_id);
        log::debug!("REMOTE PUSH: path='{}'", path);

        let mut data = self
            .data
            .write()
            .map_err(|_| SyncError::Network("remote store unavailable".to_string()))?;

        // Same unique_identifier keeps its first-assigned identity.
        let internal_id = data
            .get(&path)
            .and_then(|stored| stored.get(fields::INTERNAL_ID))
            .and_then(Value::as_str)
            .map(|id| id.to_string())
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        let mut stored = object.clone();
        stored.insert(
            fields::INTERNAL_ID.to_string(),
            Value::String(internal_id.clone()),
        );
        // Client bookkeeping is not the server's to keep.
        stored.remove(fields::SYNCED);
        stored.remove(fields::LAST_SYNCED_AT);
        data.insert(path, Value::Object(stored));

        Ok(PushReceipt {
            internal_id,
            timestamp: datetime::format(datetime::now()),
        })
    }

    fn pull_all(&self, record_type: &str) -> Result<Vec<Value>, SyncError> {
        let prefix = format!("{}/", record_type);
        log::debug!("REMOTE PULL ALL: prefix='{}'", prefix);
        let data = self
            .data
            .read()
            .map_err(|_| SyncError::Network("remote store unavailable".to_string()))?;
        let mut paths: Vec<&String> = data.keys().filter(|k| k.starts_with(&prefix)).collect();
        paths.sort();
        let records = paths.into_iter().map(|path| data[path].clone()).collect();
        Ok(records)
    }

    fn delete_all(&self, record_type: &str) -> Result<(), SyncError> {
        let prefix = format!("{}/", record_type);
        log::debug!("REMOTE DELETE ALL: prefix='{}'", prefix);
        let mut data = self
            .data
            .write()
            .map_err(|_| SyncError::Network("remote store unavailable".to_string()))?;
        data.retain(|path, _| !path.starts_with(&prefix));
        Ok(())
    }
}
