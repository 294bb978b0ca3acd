// End-to-end chat fabric scenarios over the loopback broker: two service
// nodes sharing one store, fake sockets wired through the connection
// manager.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use partgrid::cache::{CacheManager, MemoryCacheBackend};
use partgrid::chat::{
    ChatFabric, ChatService, ChatStore, ConnectionManager, LoopbackBroker,
};
use partgrid::config::Settings;
use partgrid::security::EncryptionService;

fn shared_cache() -> Arc<CacheManager> {
    let cache = Arc::new(CacheManager::new());
    cache.register_backend("memory", Arc::new(MemoryCacheBackend::new()));
    cache
}

fn encryption() -> Arc<EncryptionService> {
    Arc::new(EncryptionService::new(Settings::default().encryption_master_key.expose()).unwrap())
}

/// Two chat-service nodes over one store and one broker.
fn two_nodes() -> (Arc<ChatService>, Arc<ChatService>) {
    let store = Arc::new(ChatStore::new());
    let cache = shared_cache();
    let encryption = encryption();

    let fabric1 = Arc::new(ChatFabric::new(Arc::new(ConnectionManager::new())));
    let fabric2 = Arc::new(ChatFabric::new(Arc::new(ConnectionManager::new())));
    let broker = Arc::new(LoopbackBroker::new());
    broker.register(&fabric1);
    broker.register(&fabric2);
    fabric1.set_broker(broker.clone());
    fabric2.set_broker(broker);

    (
        Arc::new(ChatService::new(
            store.clone(),
            encryption.clone(),
            fabric1,
            cache.clone(),
        )),
        Arc::new(ChatService::new(store, encryption, fabric2, cache)),
    )
}

async fn connect(service: &ChatService, user: Uuid, conn: &str) -> mpsc::UnboundedReceiver<String> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    service.on_connect(conn, user, tx).await;
    // connected + room_list frames
    rx.recv().await.unwrap();
    rx.recv().await.unwrap();
    rx
}

async fn join(service: &ChatService, conn: &str, room: Uuid) {
    service
        .handle_frame(conn, &json!({"command": "join_room", "room_id": room}).to_string())
        .await;
}

fn frame(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap()
}

#[tokio::test]
async fn test_direct_chat_creation_uniqueness() {
    let (node, _) = two_nodes();
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

    let (room1, created1) = node.get_or_create_direct_chat(a, b).await.unwrap();
    assert!(created1);

    // Second request returns the same room, not a new one.
    let (room2, created2) = node.get_or_create_direct_chat(a, b).await.unwrap();
    assert!(!created2);
    assert_eq!(room1.id, room2.id);

    // Exactly two active members.
    let members = node.members.get_by_room(room1.id, true).await;
    assert_eq!(members.len(), 2);
}

#[tokio::test]
async fn test_cross_node_message_delivery() {
    let (node1, node2) = two_nodes();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let (room, _) = node1.rooms.create_direct_chat(alice, bob).await.unwrap();

    let mut rx_a = connect(&node1, alice, "n1-a").await;
    let mut rx_b = connect(&node2, bob, "n2-b").await;

    join(&node1, "n1-a", room.id).await;
    join(&node2, "n2-b", room.id).await;
    assert_eq!(frame(&rx_a.recv().await.unwrap())["type"], "room_joined");
    assert_eq!(frame(&rx_b.recv().await.unwrap())["type"], "room_joined");
    // Bob's join crossed nodes to alice.
    assert_eq!(frame(&rx_a.recv().await.unwrap())["type"], "user_joined");

    node1
        .handle_frame(
            "n1-a",
            &json!({
                "command": "send_message",
                "room_id": room.id,
                "data": {"content": "hello"}
            })
            .to_string(),
        )
        .await;

    // A sees message_sent exactly once.
    let echo = frame(&rx_a.recv().await.unwrap());
    assert_eq!(echo["type"], "message_sent");
    assert_eq!(echo["data"]["content"], "hello");
    assert!(rx_a.try_recv().is_err());

    // B sees new_message exactly once with the body, and no user_joined.
    let delivered = frame(&rx_b.recv().await.unwrap());
    assert_eq!(delivered["type"], "new_message");
    assert_eq!(delivered["data"]["content"], "hello");
    assert!(rx_b.try_recv().is_err());
}

#[tokio::test]
async fn test_edit_then_delete_permissions() {
    let (node, _) = two_nodes();
    let owner = Uuid::new_v4();
    let sender = Uuid::new_v4();
    let (room, _) = node
        .rooms
        .create_group_chat("parts-team", owner, vec![sender], None)
        .await
        .unwrap();

    let mut rx_owner = connect(&node, owner, "c-owner").await;
    let mut rx_sender = connect(&node, sender, "c-sender").await;
    join(&node, "c-owner", room.id).await;
    join(&node, "c-sender", room.id).await;
    rx_owner.recv().await.unwrap(); // room_joined
    rx_sender.recv().await.unwrap(); // room_joined
    rx_owner.recv().await.unwrap(); // sender's user_joined

    // Sender posts, then edits their message.
    node.handle_frame(
        "c-sender",
        &json!({
            "command": "send_message",
            "room_id": room.id,
            "data": {"content": "draft"}
        })
        .to_string(),
    )
    .await;
    let sent = frame(&rx_sender.recv().await.unwrap());
    let message_id = sent["data"]["id"].as_str().unwrap().to_string();
    let broadcast = frame(&rx_owner.recv().await.unwrap());
    assert_eq!(broadcast["type"], "new_message");

    node.handle_frame(
        "c-sender",
        &json!({
            "command": "edit_message",
            "room_id": room.id,
            "data": {"message_id": message_id, "content": "revised"}
        })
        .to_string(),
    )
    .await;
    let edited_echo = frame(&rx_sender.recv().await.unwrap());
    assert_eq!(edited_echo["type"], "message_edited");
    assert_eq!(edited_echo["data"]["content"], "revised");
    assert_eq!(frame(&rx_owner.recv().await.unwrap())["type"], "message_edited");

    // The room owner deletes it.
    node.handle_frame(
        "c-owner",
        &json!({
            "command": "delete_message",
            "room_id": room.id,
            "data": {"message_id": message_id}
        })
        .to_string(),
    )
    .await;
    assert_eq!(frame(&rx_owner.recv().await.unwrap())["type"], "message_deleted");
    assert_eq!(frame(&rx_sender.recv().await.unwrap())["type"], "message_deleted");

    // History without deleted messages is empty...
    node.handle_frame(
        "c-sender",
        &json!({
            "command": "fetch_history",
            "room_id": room.id,
            "data": {}
        })
        .to_string(),
    )
    .await;
    let history = frame(&rx_sender.recv().await.unwrap());
    assert_eq!(history["type"], "message_history");
    assert_eq!(history["data"]["messages"].as_array().unwrap().len(), 0);

    // ...and includes the tombstone when asked.
    node.handle_frame(
        "c-sender",
        &json!({
            "command": "fetch_history",
            "room_id": room.id,
            "data": {"include_deleted": true}
        })
        .to_string(),
    )
    .await;
    let full_history = frame(&rx_sender.recv().await.unwrap());
    let messages = full_history["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["is_deleted"], true);
}

#[tokio::test]
async fn test_send_message_rate_limit() {
    let (node, _) = two_nodes();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let (room, _) = node.rooms.create_direct_chat(alice, bob).await.unwrap();

    let mut rx = connect(&node, alice, "c1").await;
    join(&node, "c1", room.id).await;
    rx.recv().await.unwrap(); // room_joined

    for i in 0..11 {
        node.handle_frame(
            "c1",
            &json!({
                "command": "send_message",
                "room_id": room.id,
                "data": {"content": format!("m{}", i)}
            })
            .to_string(),
        )
        .await;
    }

    // First ten echo as message_sent.
    for _ in 0..10 {
        let echo = frame(&rx.recv().await.unwrap());
        assert_eq!(echo["type"], "message_sent");
    }
    // The eleventh is denied with rate-limit data.
    let denied = frame(&rx.recv().await.unwrap());
    assert_eq!(denied["type"], "error");
    assert_eq!(denied["success"], false);
    assert_eq!(denied["error"], "Rate limit exceeded");
    assert_eq!(denied["data"]["remaining"], 0);
    assert!(denied["data"]["reset"].as_u64().unwrap() <= 60);

    // Only ten messages were persisted.
    let persisted = node.messages.get_room_messages(room.id, 100, None, false).await;
    assert_eq!(persisted.len(), 10);
}

#[tokio::test]
async fn test_typing_indicator_excludes_originator() {
    let (node1, node2) = two_nodes();
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let (room, _) = node1.rooms.create_direct_chat(alice, bob).await.unwrap();

    let mut rx_a = connect(&node1, alice, "a").await;
    let mut rx_b = connect(&node2, bob, "b").await;
    join(&node1, "a", room.id).await;
    join(&node2, "b", room.id).await;
    rx_a.recv().await.unwrap();
    rx_b.recv().await.unwrap();
    rx_a.recv().await.unwrap(); // bob joined

    node1
        .handle_frame(
            "a",
            &json!({"command": "typing_start", "room_id": room.id}).to_string(),
        )
        .await;

    let typing = frame(&rx_b.recv().await.unwrap());
    assert_eq!(typing["type"], "user_typing");
    assert_eq!(typing["data"]["user_id"], json!(alice));
    assert!(rx_a.try_recv().is_err());
}
