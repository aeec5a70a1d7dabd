//! Version store
//!
//! Append-only chain of annotation states per (task, annotator). A chain
//! has exactly one current (active) version at any time; superseding never
//! deletes, and rollback records a new version rather than rewriting
//! history. Number assignment and superseding the prior current happen as
//! one atomic step under the chain's mutex.

use crate::store::KeyedStore;
use aqw_common::events::{AqwEvent, EventBus};
use aqw_common::models::{ChangeType, FieldChange, FieldChangeKind, Version, VersionState};
use aqw_common::{SharedClock, SystemClock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Version store errors
#[derive(Debug, Error)]
pub enum VersionError {
    /// The requested version does not exist
    #[error("version {version_number} not found for task {task_id}, annotator {annotator_id}")]
    NotFound {
        task_id: String,
        annotator_id: String,
        version_number: u64,
    },

    /// The chain's single-current invariant was found broken; a defect,
    /// not a caller mistake
    #[error("version chain invariant violated for task {task_id}, annotator {annotator_id}: {detail}")]
    InvariantViolation {
        task_id: String,
        annotator_id: String,
        detail: String,
    },

    /// The current version cannot be soft-deleted
    #[error("version {version_number} is current for task {task_id}, annotator {annotator_id} and cannot be deleted")]
    CannotDeleteCurrent {
        task_id: String,
        annotator_id: String,
        version_number: u64,
    },
}

type ChainKey = (String, String);

/// One (task, annotator) chain, oldest first
#[derive(Default)]
struct VersionChain {
    versions: Vec<Version>,
}

impl VersionChain {
    fn current_index(&self) -> Option<usize> {
        self.versions
            .iter()
            .rposition(|v| v.state == VersionState::Active)
    }

    fn next_number(&self) -> u64 {
        self.versions.last().map_or(1, |v| v.version_number + 1)
    }
}

/// Append-only store of annotation versions
pub struct VersionStore {
    chains: KeyedStore<ChainKey, VersionChain>,
    clock: SharedClock,
    event_bus: EventBus,
}

impl VersionStore {
    pub fn new(event_bus: EventBus) -> Self {
        Self::with_clock(event_bus, Arc::new(SystemClock))
    }

    pub fn with_clock(event_bus: EventBus, clock: SharedClock) -> Self {
        Self {
            chains: KeyedStore::new(),
            clock,
            event_bus,
        }
    }

    /// Record a new version as the chain's current state
    ///
    /// If `parent` is None the version links to the previously current
    /// version, which is marked superseded in the same atomic step.
    pub async fn create_version(
        &self,
        task_id: &str,
        annotator_id: &str,
        data: Value,
        change_type: ChangeType,
        parent: Option<Uuid>,
    ) -> Result<Version, VersionError> {
        let key = (task_id.to_string(), annotator_id.to_string());
        let entry = self.chains.entry(&key).await;
        let mut chain = entry.lock().await;

        self.check_single_current(&chain, task_id, annotator_id)?;

        let prior_current = chain.current_index();
        let parent_version_id =
            parent.or_else(|| prior_current.map(|i| chain.versions[i].id));

        if let Some(i) = prior_current {
            chain.versions[i].state = VersionState::Superseded;
        }

        let version = Version {
            id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            annotator_id: annotator_id.to_string(),
            version_number: chain.next_number(),
            data,
            parent_version_id,
            change_type,
            state: VersionState::Active,
            created_at: self.clock.now(),
        };
        chain.versions.push(version.clone());

        debug!(
            task_id = %task_id,
            annotator_id = %annotator_id,
            version_number = version.version_number,
            change_type = change_type.as_str(),
            "Version created"
        );
        self.event_bus.emit_lossy(AqwEvent::VersionCreated {
            task_id: task_id.to_string(),
            annotator_id: annotator_id.to_string(),
            version_id: version.id,
            version_number: version.version_number,
            change_type,
            timestamp: version.created_at,
        });

        Ok(version)
    }

    /// The chain's current (active) version, if any
    pub async fn get_current(&self, task_id: &str, annotator_id: &str) -> Option<Version> {
        let key = (task_id.to_string(), annotator_id.to_string());
        let entry = self.chains.get(&key).await?;
        let chain = entry.lock().await;
        chain.current_index().map(|i| chain.versions[i].clone())
    }

    /// All versions of a chain, newest first. Soft-deleted versions are
    /// hidden unless `include_deleted` is set.
    pub async fn get_all(
        &self,
        task_id: &str,
        annotator_id: &str,
        include_deleted: bool,
    ) -> Vec<Version> {
        let key = (task_id.to_string(), annotator_id.to_string());
        let Some(entry) = self.chains.get(&key).await else {
            return Vec::new();
        };
        let chain = entry.lock().await;
        chain
            .versions
            .iter()
            .rev()
            .filter(|v| include_deleted || v.state != VersionState::Deleted)
            .cloned()
            .collect()
    }

    /// Fetch one version by number
    pub async fn get_version(
        &self,
        task_id: &str,
        annotator_id: &str,
        version_number: u64,
    ) -> Result<Version, VersionError> {
        let key = (task_id.to_string(), annotator_id.to_string());
        let entry = self.chains.get(&key).await.ok_or_else(|| VersionError::NotFound {
            task_id: task_id.to_string(),
            annotator_id: annotator_id.to_string(),
            version_number,
        })?;
        let chain = entry.lock().await;
        chain
            .versions
            .iter()
            .find(|v| v.version_number == version_number)
            .cloned()
            .ok_or_else(|| VersionError::NotFound {
                task_id: task_id.to_string(),
                annotator_id: annotator_id.to_string(),
                version_number,
            })
    }

    /// Roll the chain back to an earlier version's data
    ///
    /// Creates a new version carrying the target's data; the target and
    /// every other historical version stay untouched. The version that
    /// was current is marked rolled_back rather than superseded.
    pub async fn rollback(
        &self,
        task_id: &str,
        annotator_id: &str,
        target_version_number: u64,
        actor_id: &str,
        reason: &str,
    ) -> Result<Version, VersionError> {
        let key = (task_id.to_string(), annotator_id.to_string());
        let entry = self.chains.entry(&key).await;
        let mut chain = entry.lock().await;

        self.check_single_current(&chain, task_id, annotator_id)?;

        let target = chain
            .versions
            .iter()
            .find(|v| v.version_number == target_version_number && v.state != VersionState::Deleted)
            .cloned()
            .ok_or_else(|| VersionError::NotFound {
                task_id: task_id.to_string(),
                annotator_id: annotator_id.to_string(),
                version_number: target_version_number,
            })?;

        if let Some(i) = chain.current_index() {
            chain.versions[i].state = VersionState::RolledBack;
        }

        let version = Version {
            id: Uuid::new_v4(),
            task_id: task_id.to_string(),
            annotator_id: annotator_id.to_string(),
            version_number: chain.next_number(),
            data: target.data.clone(),
            parent_version_id: Some(target.id),
            change_type: ChangeType::Rollback,
            state: VersionState::Active,
            created_at: self.clock.now(),
        };
        chain.versions.push(version.clone());

        info!(
            task_id = %task_id,
            annotator_id = %annotator_id,
            target_version_number,
            new_version_number = version.version_number,
            actor_id = %actor_id,
            "Chain rolled back"
        );
        self.event_bus.emit_lossy(AqwEvent::VersionRolledBack {
            task_id: task_id.to_string(),
            annotator_id: annotator_id.to_string(),
            target_version_number,
            new_version_id: version.id,
            actor_id: actor_id.to_string(),
            reason: reason.to_string(),
            timestamp: version.created_at,
        });

        Ok(version)
    }

    /// Soft-delete a non-current version. The record stays in the chain
    /// and remains retrievable with `include_deleted`.
    pub async fn soft_delete(
        &self,
        task_id: &str,
        annotator_id: &str,
        version_number: u64,
    ) -> Result<(), VersionError> {
        let key = (task_id.to_string(), annotator_id.to_string());
        let entry = self.chains.get(&key).await.ok_or_else(|| VersionError::NotFound {
            task_id: task_id.to_string(),
            annotator_id: annotator_id.to_string(),
            version_number,
        })?;
        let mut chain = entry.lock().await;

        let index = chain
            .versions
            .iter()
            .position(|v| v.version_number == version_number)
            .ok_or_else(|| VersionError::NotFound {
                task_id: task_id.to_string(),
                annotator_id: annotator_id.to_string(),
                version_number,
            })?;

        if chain.versions[index].state == VersionState::Active {
            return Err(VersionError::CannotDeleteCurrent {
                task_id: task_id.to_string(),
                annotator_id: annotator_id.to_string(),
                version_number,
            });
        }

        chain.versions[index].state = VersionState::Deleted;
        Ok(())
    }

    /// Compute top-level field changes between two versions
    ///
    /// Structural key comparison one level deep: per field, added,
    /// modified or deleted. Non-object payloads are compared as a single
    /// "$" field.
    pub fn diff(old: &Version, new: &Version) -> Vec<FieldChange> {
        let old_map = as_field_map(&old.data);
        let new_map = as_field_map(&new.data);

        let mut changes = Vec::new();
        for (field, old_value) in &old_map {
            match new_map.get(field) {
                None => changes.push(FieldChange {
                    field: field.clone(),
                    kind: FieldChangeKind::Deleted,
                    old_value: Some(old_value.clone()),
                    new_value: None,
                }),
                Some(new_value) if new_value != old_value => changes.push(FieldChange {
                    field: field.clone(),
                    kind: FieldChangeKind::Modified,
                    old_value: Some(old_value.clone()),
                    new_value: Some(new_value.clone()),
                }),
                Some(_) => {}
            }
        }
        for (field, new_value) in &new_map {
            if !old_map.contains_key(field) {
                changes.push(FieldChange {
                    field: field.clone(),
                    kind: FieldChangeKind::Added,
                    old_value: None,
                    new_value: Some(new_value.clone()),
                });
            }
        }
        changes
    }

    /// Guard the single-current invariant before mutating a chain. A
    /// broken chain is a defect in this store, logged loudly and surfaced
    /// as its own error.
    fn check_single_current(
        &self,
        chain: &VersionChain,
        task_id: &str,
        annotator_id: &str,
    ) -> Result<(), VersionError> {
        let active = chain
            .versions
            .iter()
            .filter(|v| v.state == VersionState::Active)
            .count();
        if active > 1 {
            error!(
                task_id = %task_id,
                annotator_id = %annotator_id,
                active_count = active,
                "Version chain has multiple current versions"
            );
            return Err(VersionError::InvariantViolation {
                task_id: task_id.to_string(),
                annotator_id: annotator_id.to_string(),
                detail: format!("{active} versions marked current"),
            });
        }
        Ok(())
    }
}

/// View a payload as a field map; scalars and arrays become a single
/// "$" field so the one-level contract still holds.
fn as_field_map(data: &Value) -> BTreeMap<String, Value> {
    match data {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        other => {
            let mut map = BTreeMap::new();
            map.insert("$".to_string(), other.clone());
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> VersionStore {
        VersionStore::new(EventBus::new(16))
    }

    #[tokio::test]
    async fn test_version_numbers_monotonic() {
        let store = store();
        for i in 1..=5u64 {
            let v = store
                .create_version("t1", "alice", json!({"label": i}), ChangeType::Update, None)
                .await
                .unwrap();
            assert_eq!(v.version_number, i);
        }

        let all = store.get_all("t1", "alice", false).await;
        let numbers: Vec<u64> = all.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_single_current_version() {
        let store = store();
        store
            .create_version("t1", "alice", json!({"label": "a"}), ChangeType::Create, None)
            .await
            .unwrap();
        store
            .create_version("t1", "alice", json!({"label": "b"}), ChangeType::Update, None)
            .await
            .unwrap();

        let all = store.get_all("t1", "alice", false).await;
        let active: Vec<_> = all
            .iter()
            .filter(|v| v.state == VersionState::Active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version_number, 2);
        assert_eq!(all[1].state, VersionState::Superseded);
    }

    #[tokio::test]
    async fn test_parent_links_to_prior_current() {
        let store = store();
        let v1 = store
            .create_version("t1", "alice", json!({}), ChangeType::Create, None)
            .await
            .unwrap();
        let v2 = store
            .create_version("t1", "alice", json!({"x": 1}), ChangeType::Update, None)
            .await
            .unwrap();

        assert_eq!(v1.parent_version_id, None);
        assert_eq!(v2.parent_version_id, Some(v1.id));
    }

    #[tokio::test]
    async fn test_chains_are_per_annotator() {
        let store = store();
        store
            .create_version("t1", "alice", json!({}), ChangeType::Create, None)
            .await
            .unwrap();
        let v = store
            .create_version("t1", "bob", json!({}), ChangeType::Create, None)
            .await
            .unwrap();

        // Bob's chain starts at 1 regardless of Alice's
        assert_eq!(v.version_number, 1);
        assert_eq!(store.get_current("t1", "alice").await.unwrap().annotator_id, "alice");
    }

    #[tokio::test]
    async fn test_rollback_creates_new_version() {
        let store = store();
        for i in 1..=5u64 {
            store
                .create_version("t1", "alice", json!({"label": i}), ChangeType::Update, None)
                .await
                .unwrap();
        }

        let rolled = store
            .rollback("t1", "alice", 2, "admin", "annotator request")
            .await
            .unwrap();
        assert_eq!(rolled.version_number, 6);
        assert_eq!(rolled.data, json!({"label": 2}));
        assert_eq!(rolled.change_type, ChangeType::Rollback);

        // History is intact and retrievable
        let all = store.get_all("t1", "alice", false).await;
        assert_eq!(all.len(), 6);
        for number in 1..=5u64 {
            let v = store.get_version("t1", "alice", number).await.unwrap();
            assert_eq!(v.data, json!({"label": number}));
        }

        // The pre-rollback current was abandoned, not superseded
        let v5 = store.get_version("t1", "alice", 5).await.unwrap();
        assert_eq!(v5.state, VersionState::RolledBack);
    }

    #[tokio::test]
    async fn test_rollback_missing_target_is_not_found() {
        let store = store();
        store
            .create_version("t1", "alice", json!({}), ChangeType::Create, None)
            .await
            .unwrap();

        let result = store.rollback("t1", "alice", 99, "admin", "typo").await;
        assert!(matches!(result, Err(VersionError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_soft_delete_hides_but_keeps_version() {
        let store = store();
        store
            .create_version("t1", "alice", json!({"label": "a"}), ChangeType::Create, None)
            .await
            .unwrap();
        store
            .create_version("t1", "alice", json!({"label": "b"}), ChangeType::Update, None)
            .await
            .unwrap();

        store.soft_delete("t1", "alice", 1).await.unwrap();

        assert_eq!(store.get_all("t1", "alice", false).await.len(), 1);
        let with_deleted = store.get_all("t1", "alice", true).await;
        assert_eq!(with_deleted.len(), 2);
        assert_eq!(with_deleted[1].state, VersionState::Deleted);
    }

    #[tokio::test]
    async fn test_soft_delete_current_is_rejected() {
        let store = store();
        store
            .create_version("t1", "alice", json!({}), ChangeType::Create, None)
            .await
            .unwrap();

        let result = store.soft_delete("t1", "alice", 1).await;
        assert!(matches!(result, Err(VersionError::CannotDeleteCurrent { .. })));
    }

    #[tokio::test]
    async fn test_diff_field_changes() {
        let store = store();
        let old = store
            .create_version(
                "t1",
                "alice",
                json!({"label": "positive", "span": [0, 4], "note": "x"}),
                ChangeType::Create,
                None,
            )
            .await
            .unwrap();
        let new = store
            .create_version(
                "t1",
                "alice",
                json!({"label": "negative", "span": [0, 4], "reviewer_hint": true}),
                ChangeType::Update,
                None,
            )
            .await
            .unwrap();

        let changes = VersionStore::diff(&old, &new);
        let find = |field: &str| changes.iter().find(|c| c.field == field).unwrap();

        assert_eq!(find("label").kind, FieldChangeKind::Modified);
        assert_eq!(find("note").kind, FieldChangeKind::Deleted);
        assert_eq!(find("reviewer_hint").kind, FieldChangeKind::Added);
        assert!(!changes.iter().any(|c| c.field == "span"));
    }

    #[tokio::test]
    async fn test_diff_non_object_payload() {
        let store = store();
        let old = store
            .create_version("t1", "alice", json!("positive"), ChangeType::Create, None)
            .await
            .unwrap();
        let new = store
            .create_version("t1", "alice", json!("negative"), ChangeType::Update, None)
            .await
            .unwrap();

        let changes = VersionStore::diff(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "$");
        assert_eq!(changes[0].kind, FieldChangeKind::Modified);
    }

    #[tokio::test]
    async fn test_get_current_empty_chain() {
        let store = store();
        assert!(store.get_current("t1", "nobody").await.is_none());
    }
}
