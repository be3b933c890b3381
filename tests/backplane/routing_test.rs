//! Routing across several processes sharing one backplane.

use std::sync::Arc;

use serde_json::json;

use hub_backplane::{Backplane, HubContext, JsonArgsCodec};

use crate::common::{config, process, settle, TestConnection};

const HUB: &str = "ChatHub";

#[tokio::test]
async fn test_group_send_except_skips_excluded_member() {
    let backplane = Backplane::in_memory(&config(10));
    let a = process(HUB, &backplane).await;
    let b = process(HUB, &backplane).await;
    let c1 = TestConnection::new("c1");
    let c2 = TestConnection::new("c2");
    let c3 = TestConnection::new("c3");
    a.on_connected(c1.clone()).await.unwrap();
    a.on_connected(c2.clone()).await.unwrap();
    b.on_connected(c3.clone()).await.unwrap();
    for id in ["c1", "c2", "c3"] {
        a.add_to_group(id, "room", None).await.unwrap();
    }

    b.send_group_except("room", "notify", &[json!("hi")], &["c2".to_string()], None)
        .await
        .unwrap();

    assert_eq!(c1.wait_for(1).await, vec!["notify"]);
    assert_eq!(c3.wait_for(1).await, vec!["notify"]);
    settle().await;
    assert!(c2.methods().await.is_empty());
}

#[tokio::test]
async fn test_broadcast_reaches_every_process() {
    let backplane = Backplane::in_memory(&config(10));
    let a = process(HUB, &backplane).await;
    let b = process(HUB, &backplane).await;
    let c1 = TestConnection::new("c1");
    let c2 = TestConnection::new("c2");
    a.on_connected(c1.clone()).await.unwrap();
    b.on_connected(c2.clone()).await.unwrap();

    a.send_all("announce", &[], None).await.unwrap();

    assert_eq!(c1.wait_for(1).await, vec!["announce"]);
    assert_eq!(c2.wait_for(1).await, vec!["announce"]);
}

#[tokio::test]
async fn test_broadcast_except_applies_on_every_process() {
    let backplane = Backplane::in_memory(&config(10));
    let a = process(HUB, &backplane).await;
    let b = process(HUB, &backplane).await;
    let c1 = TestConnection::new("c1");
    let c2 = TestConnection::new("c2");
    a.on_connected(c1.clone()).await.unwrap();
    b.on_connected(c2.clone()).await.unwrap();

    a.send_all_except("announce", &[], &["c2".to_string()], None)
        .await
        .unwrap();

    assert_eq!(c1.wait_for(1).await, vec!["announce"]);
    settle().await;
    assert!(c2.methods().await.is_empty());
}

#[tokio::test]
async fn test_user_on_several_processes() {
    let backplane = Backplane::in_memory(&config(10));
    let a = process(HUB, &backplane).await;
    let b = process(HUB, &backplane).await;
    let phone = TestConnection::for_user("phone", "alice");
    let laptop = TestConnection::for_user("laptop", "alice");
    a.on_connected(phone.clone()).await.unwrap();
    b.on_connected(laptop.clone()).await.unwrap();

    let context = HubContext::new(&backplane, HUB, Arc::new(JsonArgsCodec));
    context
        .clients()
        .user("alice", "ping", &[json!(1)], None)
        .await
        .unwrap();

    assert_eq!(phone.wait_for(1).await, vec!["ping"]);
    assert_eq!(laptop.wait_for(1).await, vec!["ping"]);

    b.on_disconnected("laptop").await.unwrap();
    context.clients().user("alice", "again", &[], None).await.unwrap();
    assert_eq!(phone.wait_for(2).await, vec!["ping", "again"]);
    settle().await;
    assert_eq!(laptop.methods().await, vec!["ping"]);
}

#[tokio::test]
async fn test_hubs_are_isolated() {
    let backplane = Backplane::in_memory(&config(10));
    let chat = process("ChatHub", &backplane).await;
    let admin = process("AdminHub", &backplane).await;
    let c1 = TestConnection::new("c1");
    let c2 = TestConnection::new("c1");
    chat.on_connected(c1.clone()).await.unwrap();
    admin.on_connected(c2.clone()).await.unwrap();
    chat.add_to_group("c1", "ops", None).await.unwrap();

    chat.send_all("chat", &[], None).await.unwrap();
    chat.send_group("ops", "chat-ops", &[], None).await.unwrap();
    admin.send_all("admin", &[], None).await.unwrap();

    assert_eq!(c1.wait_for(2).await, vec!["chat", "chat-ops"]);
    assert_eq!(c2.wait_for(1).await, vec!["admin"]);
    settle().await;
    assert_eq!(c2.methods().await, vec!["admin"]);
}
