//! In-memory snapshot store.
//!
//! Suitable for development and single-process deployments. Snapshots
//! survive actor deactivation but not process restarts.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interfaces::snapshot_store::{Result, SnapshotStore};
use crate::runtime::ActorKind;

/// Snapshot store backed by a map.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<(ActorKind, String), Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stored_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    pub async fn contains(&self, kind: ActorKind, key: &str) -> bool {
        self.snapshots
            .read()
            .await
            .contains_key(&(kind, key.to_string()))
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, kind: ActorKind, key: &str) -> Result<Option<Vec<u8>>> {
        let store = self.snapshots.read().await;
        Ok(store.get(&(kind, key.to_string())).cloned())
    }

    async fn save(&self, kind: ActorKind, key: &str, snapshot: Vec<u8>) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert((kind, key.to_string()), snapshot);
        Ok(())
    }

    async fn delete(&self, kind: ActorKind, key: &str) -> Result<()> {
        self.snapshots.write().await.remove(&(kind, key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_load_delete() {
        let store = MemorySnapshotStore::new();
        assert!(store.load(ActorKind::Group, "hub::g").await.unwrap().is_none());

        store
            .save(ActorKind::Group, "hub::g", b"one".to_vec())
            .await
            .unwrap();
        store
            .save(ActorKind::Group, "hub::g", b"two".to_vec())
            .await
            .unwrap();
        assert_eq!(
            store.load(ActorKind::Group, "hub::g").await.unwrap(),
            Some(b"two".to_vec())
        );
        assert_eq!(store.stored_count().await, 1);

        store.delete(ActorKind::Group, "hub::g").await.unwrap();
        assert!(!store.contains(ActorKind::Group, "hub::g").await);
    }

    #[tokio::test]
    async fn test_kinds_do_not_collide() {
        let store = MemorySnapshotStore::new();
        store
            .save(ActorKind::Group, "hub::x", b"group".to_vec())
            .await
            .unwrap();
        store
            .save(ActorKind::User, "hub::x", b"user".to_vec())
            .await
            .unwrap();
        assert_eq!(
            store.load(ActorKind::User, "hub::x").await.unwrap(),
            Some(b"user".to_vec())
        );
        assert_eq!(store.stored_count().await, 2);
    }
}
