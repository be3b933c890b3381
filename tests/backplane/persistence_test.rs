//! Snapshot persistence across deactivation and backplane restarts.

use std::sync::Arc;

use hub_backplane::runtime::ActorKind;
use hub_backplane::storage::MemorySnapshotStore;
use hub_backplane::{Backplane, BackplaneConfig};

use crate::common::{config, payload};

const HUB: &str = "ChatHub";

fn persistent_config() -> BackplaneConfig {
    let mut config = config(10);
    config.persistence.enabled = true;
    config
}

#[tokio::test]
async fn test_stream_replay_survives_deactivation() {
    let store = Arc::new(MemorySnapshotStore::new());
    let backplane = Backplane::new(&persistent_config(), store.clone());
    let stream = backplane.directory(HUB).connection("c1");
    let first = stream.push(payload("A"), None).await.unwrap();
    stream.push(payload("B"), None).await.unwrap();

    backplane.client_streams().deactivate(&format!("{HUB}::c1")).await;
    assert!(store.contains(ActorKind::ClientStream, &format!("{HUB}::c1")).await);

    let replayed = stream.messages_since(first).await.unwrap();
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].0.method, "B");
    assert_eq!(replayed[0].1.epoch, first.epoch);

    let next = stream.push(payload("C"), None).await.unwrap();
    assert_eq!(next.sequence, 3);
}

#[tokio::test]
async fn test_streams_not_persisted_when_disabled() {
    let store = Arc::new(MemorySnapshotStore::new());
    let backplane = Backplane::new(&config(10), store.clone());
    backplane
        .directory(HUB)
        .connection("c1")
        .push(payload("A"), None)
        .await
        .unwrap();

    backplane.shutdown().await;
    assert!(!store.contains(ActorKind::ClientStream, &format!("{HUB}::c1")).await);
}

#[tokio::test]
async fn test_membership_survives_backplane_restart() {
    let store = Arc::new(MemorySnapshotStore::new());
    let first = Backplane::new(&config(10), store.clone());
    first.directory(HUB).group("room").add("c1", None).await.unwrap();
    first.directory(HUB).user("alice").add("c2", None).await.unwrap();
    first.shutdown().await;

    let second = Backplane::new(&config(10), store.clone());
    let directory = second.directory(HUB);
    assert_eq!(directory.group("room").members().await.unwrap(), vec!["c1"]);
    assert_eq!(directory.user("alice").members().await.unwrap(), vec!["c2"]);
}
