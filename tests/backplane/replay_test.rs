//! Replay window and epoch behaviour seen through the directory.

use hub_backplane::{Backplane, BackplaneError, Handle};

use crate::common::{config, payload, process, settle, TestConnection};

const HUB: &str = "ChatHub";

async fn push_all(backplane: &Backplane, connection_id: &str, methods: &[&str]) -> Vec<Handle> {
    let stream = backplane.directory(HUB).connection(connection_id);
    let mut handles = Vec::new();
    for method in methods {
        handles.push(stream.push(payload(method), None).await.unwrap());
    }
    handles
}

async fn replayed_methods(backplane: &Backplane, connection_id: &str, since: Handle) -> Vec<String> {
    backplane
        .directory(HUB)
        .connection(connection_id)
        .messages_since(since)
        .await
        .unwrap()
        .into_iter()
        .map(|(payload, _)| payload.method)
        .collect()
}

#[tokio::test]
async fn test_replay_within_window() {
    let backplane = Backplane::in_memory(&config(3));
    let handles = push_all(&backplane, "c1", &["A", "B", "C", "D"]).await;

    let replayed = replayed_methods(&backplane, "c1", handles[0]).await;
    assert_eq!(replayed, vec!["B", "C", "D"]);
}

#[tokio::test]
async fn test_replay_before_first_push_returns_everything_retained() {
    let backplane = Backplane::in_memory(&config(3));
    let handles = push_all(&backplane, "c1", &["A", "B"]).await;

    let start = Handle::new(0, handles[0].epoch);
    assert_eq!(replayed_methods(&backplane, "c1", start).await, vec!["A", "B"]);
}

#[tokio::test]
async fn test_replay_past_window_is_an_error() {
    let backplane = Backplane::in_memory(&config(3));
    let handles = push_all(&backplane, "c1", &["A", "B", "C", "D", "E"]).await;

    let result = backplane
        .directory(HUB)
        .connection("c1")
        .messages_since(handles[0])
        .await;
    match result {
        Err(BackplaneError::ReplayRangeExceeded {
            requested,
            oldest_retained,
        }) => {
            assert_eq!(requested, 1);
            assert_eq!(oldest_retained, 3);
        }
        other => panic!("expected ReplayRangeExceeded, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reactivated_stream_starts_new_epoch() {
    let backplane = Backplane::in_memory(&config(3));
    let before = push_all(&backplane, "c1", &["A"]).await[0];

    backplane.client_streams().deactivate(&format!("{HUB}::c1")).await;

    // The old handle is from a dead epoch: nothing to replay, no error.
    assert!(replayed_methods(&backplane, "c1", before).await.is_empty());
    let after = push_all(&backplane, "c1", &["B"]).await[0];
    assert_ne!(after.epoch, before.epoch);
    assert_eq!(after.sequence, 1);
}

#[tokio::test]
async fn test_connection_keeps_receiving_across_reactivation() {
    let backplane = Backplane::in_memory(&config(3));
    let sender = process(HUB, &backplane).await;
    let holder = process(HUB, &backplane).await;
    let c1 = TestConnection::new("c1");
    holder.on_connected(c1.clone()).await.unwrap();

    sender.send_connection("c1", "A", &[], None).await.unwrap();
    assert_eq!(c1.wait_for(1).await, vec!["A"]);
    let first = holder.connection_subscription("c1").await;

    backplane.client_streams().deactivate(&format!("{HUB}::c1")).await;
    let deadline = tokio::time::Instant::now() + crate::common::DELIVERY_TIMEOUT;
    while holder.connection_subscription("c1").await == first
        || holder.connection_subscription("c1").await.is_none()
    {
        assert!(tokio::time::Instant::now() < deadline, "never resubscribed");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    sender.send_connection("c1", "B", &[], None).await.unwrap();
    assert_eq!(c1.wait_for(2).await, vec!["A", "B"]);
    settle().await;
    assert_eq!(c1.methods().await, vec!["A", "B"]);
}
