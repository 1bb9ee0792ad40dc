//! In-memory config store for multi-node tests.

use cluster_replication::document::ChangeDocument;
use cluster_replication::store::{BoxFuture, CheckChange, ConfigStore, FilterChange, StoreError};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// A config store backed by hash maps, usable on both sides of a
/// replication link: it serializes entities when serving and ingests
/// entities when applying.
#[derive(Default)]
pub struct TestStore {
    checks: Mutex<HashMap<Uuid, serde_json::Value>>,
    filters: Mutex<HashMap<String, serde_json::Value>>,
    /// Every check id applied, in apply order.
    applied_checks: Mutex<Vec<Uuid>>,
    applied_filters: Mutex<Vec<String>>,
    /// When set, applies fail with this message.
    fail_applies: Mutex<Option<String>>,
}

impl TestStore {
    /// Create or update a check; returns the change to hand the broadcaster.
    pub fn put_check(&self, id: Uuid, seq: i64) -> CheckChange {
        let entity = serde_json::json!({ "id": id, "seq": seq });
        self.checks.lock().unwrap().insert(id, entity);
        CheckChange {
            id,
            seq,
            self_check: false,
        }
    }

    pub fn delete_check(&self, id: Uuid) {
        self.checks.lock().unwrap().remove(&id);
    }

    pub fn put_filter(&self, name: &str, seq: i64) -> FilterChange {
        let entity = serde_json::json!({ "name": name, "seq": seq });
        self.filters.lock().unwrap().insert(name.to_string(), entity);
        FilterChange {
            name: name.to_string(),
            seq,
        }
    }

    pub fn has_check(&self, id: Uuid) -> bool {
        self.checks.lock().unwrap().contains_key(&id)
    }

    pub fn check_count(&self) -> usize {
        self.checks.lock().unwrap().len()
    }

    pub fn filter_count(&self) -> usize {
        self.filters.lock().unwrap().len()
    }

    pub fn applied_check_ids(&self) -> Vec<Uuid> {
        self.applied_checks.lock().unwrap().clone()
    }

    pub fn applied_filter_names(&self) -> Vec<String> {
        self.applied_filters.lock().unwrap().clone()
    }

    pub fn fail_applies(&self, message: &str) {
        *self.fail_applies.lock().unwrap() = Some(message.to_string());
    }

    pub fn heal(&self) {
        *self.fail_applies.lock().unwrap() = None;
    }
}

impl ConfigStore for TestStore {
    fn serialize_check(&self, id: Uuid) -> Option<serde_json::Value> {
        self.checks.lock().unwrap().get(&id).cloned()
    }

    fn serialize_filter(&self, name: &str) -> Option<serde_json::Value> {
        self.filters.lock().unwrap().get(name).cloned()
    }

    fn apply_checks(&self, doc: ChangeDocument) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            if let Some(message) = self.fail_applies.lock().unwrap().clone() {
                return Err(StoreError(message));
            }
            let mut applied = 0;
            for entity in &doc.entities {
                let id: Uuid = entity
                    .get("id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| StoreError("check entity missing id".to_string()))?;
                self.checks.lock().unwrap().insert(id, entity.clone());
                self.applied_checks.lock().unwrap().push(id);
                applied += 1;
            }
            Ok(applied)
        })
    }

    fn apply_filters(&self, doc: ChangeDocument) -> BoxFuture<'_, usize> {
        Box::pin(async move {
            if let Some(message) = self.fail_applies.lock().unwrap().clone() {
                return Err(StoreError(message));
            }
            let mut applied = 0;
            for entity in &doc.entities {
                let name = entity
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| StoreError("filterset entity missing name".to_string()))?
                    .to_string();
                self.filters.lock().unwrap().insert(name.clone(), entity.clone());
                self.applied_filters.lock().unwrap().push(name);
                applied += 1;
            }
            Ok(applied)
        })
    }

    fn checks_snapshot(&self) -> Vec<CheckChange> {
        self.checks
            .lock()
            .unwrap()
            .iter()
            .map(|(id, entity)| CheckChange {
                id: *id,
                seq: entity.get("seq").and_then(|v| v.as_i64()).unwrap_or(1),
                self_check: false,
            })
            .collect()
    }

    fn filters_snapshot(&self) -> Vec<FilterChange> {
        self.filters
            .lock()
            .unwrap()
            .iter()
            .map(|(name, entity)| FilterChange {
                name: name.clone(),
                seq: entity.get("seq").and_then(|v| v.as_i64()).unwrap_or(1),
            })
            .collect()
    }
}
