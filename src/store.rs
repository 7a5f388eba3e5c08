//! In-memory snapshot registry.
//!
//! Snapshots are imported into SQLite and hydrated into this registry at
//! startup. A registered snapshot is immutable and `Arc`-shared with every
//! task processing it; re-importing a workspace replaces the entry with a
//! new snapshot rather than mutating the old one, so running tasks keep a
//! consistent view.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::models::Snapshot;

/// Summary row describing a registered snapshot.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SnapshotInfo {
    pub workspace_id: String,
    pub name: String,
    pub domain: String,
    pub extracted_at: String,
    pub channels: usize,
    pub canvases: usize,
    pub users: usize,
}

#[derive(Default)]
pub struct SnapshotStore {
    snapshots: RwLock<HashMap<String, Arc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hydrate the registry from the snapshot table.
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let store = Self::new();
        let rows = sqlx::query("SELECT body FROM snapshots")
            .fetch_all(pool)
            .await?;
        for row in rows {
            let body: String = row.get("body");
            let snapshot: Snapshot = serde_json::from_str(&body)?;
            store.insert(snapshot);
        }
        Ok(store)
    }

    /// Register or replace a snapshot.
    pub fn insert(&self, snapshot: Snapshot) {
        let mut map = self.snapshots.write().expect("snapshot store poisoned");
        map.insert(snapshot.workspace_id.clone(), Arc::new(snapshot));
    }

    pub fn get(&self, workspace_id: &str) -> Option<Arc<Snapshot>> {
        let map = self.snapshots.read().expect("snapshot store poisoned");
        map.get(workspace_id).cloned()
    }

    pub fn contains(&self, workspace_id: &str) -> bool {
        let map = self.snapshots.read().expect("snapshot store poisoned");
        map.contains_key(workspace_id)
    }

    /// List registered snapshots, ordered by workspace id.
    pub fn list(&self) -> Vec<SnapshotInfo> {
        let map = self.snapshots.read().expect("snapshot store poisoned");
        let mut infos: Vec<SnapshotInfo> = map
            .values()
            .map(|s| SnapshotInfo {
                workspace_id: s.workspace_id.clone(),
                name: s.name.clone(),
                domain: s.domain.clone(),
                extracted_at: s.extracted_at.to_rfc3339(),
                channels: s.channels.len(),
                canvases: s.canvases.len(),
                users: s.users.len(),
            })
            .collect();
        infos.sort_by(|a, b| a.workspace_id.cmp(&b.workspace_id));
        infos
    }

    pub fn len(&self) -> usize {
        let map = self.snapshots.read().expect("snapshot store poisoned");
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(id: &str) -> Snapshot {
        Snapshot {
            workspace_id: id.to_string(),
            name: "Acme".to_string(),
            domain: "acme".to_string(),
            extracted_at: Utc::now(),
            users: Vec::new(),
            channels: Vec::new(),
            canvases: Vec::new(),
        }
    }

    #[test]
    fn insert_and_get() {
        let store = SnapshotStore::new();
        assert!(store.is_empty());
        store.insert(snapshot("W1"));
        assert!(store.contains("W1"));
        assert!(!store.contains("W2"));
        assert_eq!(store.get("W1").unwrap().workspace_id, "W1");
    }

    #[test]
    fn reimport_replaces_without_mutating() {
        let store = SnapshotStore::new();
        store.insert(snapshot("W1"));
        let old = store.get("W1").unwrap();

        let mut newer = snapshot("W1");
        newer.name = "Acme v2".to_string();
        store.insert(newer);

        // The old Arc is still intact for any task holding it.
        assert_eq!(old.name, "Acme");
        assert_eq!(store.get("W1").unwrap().name, "Acme v2");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn list_is_ordered() {
        let store = SnapshotStore::new();
        store.insert(snapshot("W2"));
        store.insert(snapshot("W1"));
        let ids: Vec<String> = store.list().into_iter().map(|i| i.workspace_id).collect();
        assert_eq!(ids, vec!["W1", "W2"]);
    }
}
