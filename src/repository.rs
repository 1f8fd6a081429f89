use anyhow::Result;
use chrono::NaiveDateTime;
use serde_json::Value;

use crate::history::{ActingUser, History};
use crate::record::{fields, Record};
use crate::store::LocalStore;
use crate::sync::{PushOutcome, RemoteClient, SyncError, SyncReconciler};

/// What one synchronization pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Dirty local records acknowledged by the remote store.
    pub pushed: usize,
    /// Remote records merged into an existing local counterpart.
    pub pulled: usize,
    /// Remote records with no local counterpart, adopted locally.
    pub adopted: usize,
    /// Records skipped this pass because of a retryable error.
    pub failed: usize,
}

/// Orchestrates one record type against a local store and a remote client.
/// All edits flow through `create_or_update`, which keeps the audit trail;
/// `synchronize` drives the reconciler over every record.
pub struct Repository<S: LocalStore> {
    record_type: String,
    store: S,
}

impl<S: LocalStore> Repository<S> {
    pub fn new(record_type: &str, store: S) -> Self {
        Self {
            record_type: record_type.to_string(),
            store,
        }
    }

    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    pub fn get(&self, unique_id: &str) -> Result<Option<Record>> {
        self.store.load(unique_id)
    }

    pub fn all(&self) -> Result<Vec<Record>> {
        self.store.all()
    }

    /// Persists a record, appending the history entry for whatever changed
    /// since the stored version. A brand-new record is diffed against an
    /// empty document, so its first history entry lists every field it was
    /// created with. No-op edits append nothing but still persist.
    pub fn create_or_update(
        &self,
        record: Record,
        user: &ActingUser,
        now: NaiveDateTime,
    ) -> Result<Record> {
        let mut record = record;
        let unique_id = record.ensure_unique_id()?;

        let existing = self.store.load(&unique_id)?;
        let original = existing
            .as_ref()
            .map(|r| r.document().clone())
            .unwrap_or_default();

        if existing.is_none() {
            record.set_created_by(&user.user_name)?;
            record.set(
                fields::CREATED_ORGANISATION,
                Value::String(user.organisation.clone()),
            )?;
            record.ensure_created_at(now)?;
        }

        if let Some(history) = History::between(&original, record.document(), user, now) {
            record.add_history(history)?;
        }

        record.touch(now)?;
        self.store.save(&record)?;
        Ok(record)
    }

    /// One full reconciliation pass: push every dirty record, then pull the
    /// remote state and merge it in, record by record. Each record is worked
    /// on a copy and saved only once its push or merge fully succeeded, so an
    /// abort or a per-record failure leaves that record's stored state
    /// untouched. Retryable errors are counted and skipped; an identity
    /// conflict aborts the pass.
    pub fn synchronize<R: RemoteClient>(
        &self,
        remote: &R,
        user: &ActingUser,
        now: NaiveDateTime,
    ) -> Result<SyncSummary> {
        let reconciler = SyncReconciler::new(remote, user.clone(), &self.record_type);
        let mut summary = SyncSummary::default();

        log::info!("Starting sync pass for '{}'", self.record_type);

        for record in self.store.all()? {
            if !record.is_dirty() {
                continue;
            }
            let mut working = record.clone();
            match reconciler.push(&mut working, now) {
                Ok(PushOutcome::Pushed) => {
                    self.store.save(&working)?;
                    summary.pushed += 1;
                }
                Ok(PushOutcome::Clean) => {}
                Err(err) => match err.downcast_ref::<SyncError>() {
                    Some(SyncError::IdentityConflict { .. }) => return Err(err),
                    Some(sync_err) => {
                        log::warn!(
                            "Push failed for record '{}', will retry next pass: {}",
                            working.unique_id().unwrap_or("?"),
                            sync_err
                        );
                        summary.failed += 1;
                    }
                    None => return Err(err),
                },
            }
        }

        for payload in remote.pull_all(&self.record_type)? {
            let remote_record = Record::from_value(payload)?;
            let unique_id = remote_record
                .unique_id()
                .ok_or_else(|| {
                    anyhow::anyhow!("Remote record missing required 'unique_identifier' field")
                })?
                .to_string();

            match self.store.load(&unique_id)? {
                Some(local) => {
                    let mut working = local.clone();
                    reconciler.pull(&mut working, remote_record.document(), now)?;
                    self.store.save(&working)?;
                    summary.pulled += 1;
                }
                None => {
                    // First sight of this record: adopt it as already-synced,
                    // with a creation history attributed to the syncing actor.
                    let mut adopted = Record::new();
                    adopted.set(fields::UNIQUE_IDENTIFIER, Value::String(unique_id))?;
                    reconciler.pull(&mut adopted, remote_record.document(), now)?;
                    self.store.save(&adopted)?;
                    summary.adopted += 1;
                }
            }
        }

        log::info!(
            "Sync pass for '{}' complete: {} pushed, {} pulled, {} adopted, {} failed",
            self.record_type,
            summary.pushed,
            summary.pulled,
            summary.adopted,
            summary.failed
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime;
    use crate::store::InMemoryStore;
    use crate::sync::InMemoryRemote;
    use serde_json::json;

    fn acting_user() -> ActingUser {
        ActingUser::new("field_worker", "UNICEF")
    }

    fn at(second: u32) -> NaiveDateTime {
        datetime::parse(&format!("2014-01-01 00:00:{:02}", second)).unwrap()
    }

    fn repository() -> Repository<InMemoryStore> {
        Repository::new("children", InMemoryStore::new())
    }

    #[test]
    fn creating_a_record_appends_its_creation_history() -> Result<()> {
        let repo = repository();
        let record = Record::from_json(r#"{ "x": "v" }"#)?;
        let saved = repo.create_or_update(record, &acting_user(), at(0))?;

        let histories = saved.histories()?;
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].changes["x"].from, "");
        assert_eq!(histories[0].changes["x"].to, "v");
        assert_eq!(saved.created_by(), Some("field_worker"));
        assert_eq!(saved.created_at(), Some("2014-01-01 00:00:00"));
        assert!(!saved.synced());
        Ok(())
    }

    #[test]
    fn sequential_edits_append_distinct_histories_in_order() -> Result<()> {
        let repo = repository();
        let record = Record::from_json(r#"{ "child_name": "Foo Bar" }"#)?;
        let saved = repo.create_or_update(record, &acting_user(), at(0))?;

        let mut edited = saved.clone();
        edited.set("child_name", json!("Foo Bar124"))?;
        let saved = repo.create_or_update(edited, &acting_user(), at(1))?;

        let mut edited = saved.clone();
        edited.set("nationality", json!("ugandan"))?;
        let saved = repo.create_or_update(edited, &acting_user(), at(2))?;

        let histories = saved.histories()?;
        assert_eq!(histories.len(), 3);
        assert_eq!(histories[1].changes.len(), 1);
        assert_eq!(histories[1].changes["child_name"].from, "Foo Bar");
        assert_eq!(histories[1].changes["child_name"].to, "Foo Bar124");
        assert_eq!(histories[2].changes.len(), 1);
        assert_eq!(histories[2].changes["nationality"].to, "ugandan");
        Ok(())
    }

    #[test]
    fn saving_without_changes_appends_no_history() -> Result<()> {
        let repo = repository();
        let record = Record::from_json(r#"{ "name": "Foo Bar" }"#)?;
        let saved = repo.create_or_update(record, &acting_user(), at(0))?;

        let resaved = repo.create_or_update(saved.clone(), &acting_user(), at(1))?;
        assert_eq!(resaved.histories()?.len(), saved.histories()?.len());
        Ok(())
    }

    #[test]
    fn synchronize_pushes_dirty_records_and_is_idempotent() -> Result<()> {
        let repo = repository();
        let remote = InMemoryRemote::new();

        let record = Record::from_json(r#"{ "name": "Foo Bar" }"#)?;
        let saved = repo.create_or_update(record, &acting_user(), at(0))?;
        assert!(saved.internal_id().is_none());

        let summary = repo.synchronize(&remote, &acting_user(), at(1))?;
        assert_eq!(summary.pushed, 1);
        assert_eq!(summary.failed, 0);

        let synced = repo.get(saved.unique_id().unwrap())?.unwrap();
        assert!(synced.internal_id().is_some());
        assert!(synced.synced());

        // Nothing changed locally, so a second pass is a pure no-op.
        let histories_before = synced.histories()?.len();
        let summary = repo.synchronize(&remote, &acting_user(), at(2))?;
        assert_eq!(summary.pushed, 0);

        let after = repo.get(saved.unique_id().unwrap())?.unwrap();
        assert_eq!(after.histories()?.len(), histories_before);
        Ok(())
    }

    #[test]
    fn synchronize_merges_remote_edits_into_local_records() -> Result<()> {
        let repo = repository();
        let remote = InMemoryRemote::new();

        let record = Record::from_json(r#"{ "name": "Foo Bar" }"#)?;
        let saved = repo.create_or_update(record, &acting_user(), at(0))?;
        repo.synchronize(&remote, &acting_user(), at(1))?;

        // The record changes server-side.
        let mut server_copy = remote.pull_all("children")?.remove(0);
        server_copy["name"] = json!("Albert");
        remote.seed("children", server_copy)?;

        let summary = repo.synchronize(&remote, &acting_user(), at(2))?;
        assert_eq!(summary.pulled, 1);

        let merged = repo.get(saved.unique_id().unwrap())?.unwrap();
        assert_eq!(merged.get("name"), Some(&json!("Albert")));
        assert!(merged.synced());

        let histories = merged.histories()?;
        let last = histories.last().unwrap();
        assert_eq!(last.changes["name"].from, "Foo Bar");
        assert_eq!(last.changes["name"].to, "Albert");
        assert_eq!(last.user_name, "field_worker");
        Ok(())
    }

    #[test]
    fn synchronize_adopts_unknown_remote_records() -> Result<()> {
        let repo = repository();
        let remote = InMemoryRemote::new();
        remote.seed(
            "children",
            json!({ "unique_identifier": "c1", "name": "Foo Bar", "one": "1" }),
        )?;

        let summary = repo.synchronize(&remote, &acting_user(), at(0))?;
        assert_eq!(summary.adopted, 1);

        let adopted = repo.get("c1")?.unwrap();
        assert_eq!(adopted.get("name"), Some(&json!("Foo Bar")));
        assert!(adopted.synced());
        assert!(adopted.internal_id().is_some());
        assert!(!adopted.is_dirty());

        let histories = adopted.histories()?;
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].changes["name"].from, "");
        assert_eq!(histories[0].changes["name"].to, "Foo Bar");
        Ok(())
    }

    #[test]
    fn identity_conflict_aborts_the_pass() -> Result<()> {
        use crate::sync::{PushReceipt, RemoteClient};
        use serde_json::Value;

        struct WrongIdentityRemote;
        impl RemoteClient for WrongIdentityRemote {
            fn push(&self, _: &str, _: &Value) -> std::result::Result<PushReceipt, SyncError> {
                Ok(PushReceipt {
                    internal_id: "other-identity".to_string(),
                    timestamp: "2014-01-01 00:00:00".to_string(),
                })
            }
            fn pull_all(&self, _: &str) -> std::result::Result<Vec<Value>, SyncError> {
                Ok(Vec::new())
            }
            fn delete_all(&self, _: &str) -> std::result::Result<(), SyncError> {
                Ok(())
            }
        }

        let repo = repository();
        let mut record = Record::from_json(r#"{ "name": "Foo Bar" }"#)?;
        record.set_internal_id("bound-identity")?;
        repo.create_or_update(record, &acting_user(), at(0))?;

        let err = repo
            .synchronize(&WrongIdentityRemote, &acting_user(), at(1))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::IdentityConflict { .. })
        ));
        Ok(())
    }

    #[test]
    fn failed_pushes_are_counted_and_skipped() -> Result<()> {
        use crate::sync::{PushReceipt, RemoteClient};
        use serde_json::Value;

        struct DownRemote;
        impl RemoteClient for DownRemote {
            fn push(&self, _: &str, _: &Value) -> std::result::Result<PushReceipt, SyncError> {
                Err(SyncError::Network("no route to host".to_string()))
            }
            fn pull_all(&self, _: &str) -> std::result::Result<Vec<Value>, SyncError> {
                Ok(Vec::new())
            }
            fn delete_all(&self, _: &str) -> std::result::Result<(), SyncError> {
                Ok(())
            }
        }

        let repo = repository();
        let record = Record::from_json(r#"{ "name": "Foo Bar" }"#)?;
        let saved = repo.create_or_update(record, &acting_user(), at(0))?;

        let summary = repo.synchronize(&DownRemote, &acting_user(), at(1))?;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pushed, 0);

        // The stored record is untouched and still dirty for the next pass.
        let stored = repo.get(saved.unique_id().unwrap())?.unwrap();
        assert!(stored.is_dirty());
        assert!(stored.internal_id().is_none());
        Ok(())
    }
}
