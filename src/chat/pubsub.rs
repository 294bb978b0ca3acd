// Cross-node fan-out bridge.
//
// A local broadcast delivers to this node's sockets directly and publishes
// the frame on `chat:room:<room_id>` so other nodes deliver to theirs. Each
// envelope carries the origin node id; a node ignores its own envelopes
// coming back from the channel, so local delivery happens exactly once.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::chat::connections::ConnectionManager;
use crate::error::{AppError, Result};

pub fn room_channel(room_id: Uuid) -> String {
    format!("chat:room:{}", room_id)
}

/// Wire envelope carried on the room channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEnvelope {
    pub origin: String,
    pub room_id: Uuid,
    pub frame: Value,
    /// Connection id to skip; only meaningful on the origin node.
    pub exclude: Option<String>,
}

/// Transport for room envelopes. Publish returns after the message is
/// handed to the broker; delivery to other nodes is at-least-once.
#[async_trait]
pub trait ChatBroker: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
}

/// Node-local fabric: the connection index plus the cross-node bridge.
pub struct ChatFabric {
    node_id: String,
    manager: Arc<ConnectionManager>,
    broker: RwLock<Option<Arc<dyn ChatBroker>>>,
}

impl ChatFabric {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            node_id: Uuid::new_v4().to_string(),
            manager,
            broker: RwLock::new(None),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.manager.clone()
    }

    pub fn set_broker(&self, broker: Arc<dyn ChatBroker>) {
        *self.broker.write() = Some(broker);
    }

    /// Local fan-out plus cross-node publish. Broker failure is logged; the
    /// local deliveries stand.
    pub async fn broadcast_to_room(&self, room_id: Uuid, frame: &Value, exclude: Option<&str>) {
        let text = frame.to_string();
        self.manager.send_local_room(room_id, &text, exclude);

        let broker = self.broker.read().clone();
        if let Some(broker) = broker {
            let envelope = RoomEnvelope {
                origin: self.node_id.clone(),
                room_id,
                frame: frame.clone(),
                exclude: exclude.map(|s| s.to_string()),
            };
            match serde_json::to_string(&envelope) {
                Ok(payload) => {
                    if let Err(err) = broker.publish(&room_channel(room_id), &payload).await {
                        tracing::warn!(room = %room_id, error = %err, "room publish failed");
                    }
                }
                Err(err) => {
                    tracing::error!(room = %room_id, error = %err, "room envelope serialization failed")
                }
            }
        }
    }

    /// Deliver an envelope received from the channel to this node's local
    /// sockets. Own envelopes are skipped; the originating node already
    /// delivered locally.
    pub fn handle_incoming(&self, payload: &str) {
        let envelope: RoomEnvelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed room envelope");
                return;
            }
        };
        if envelope.origin == self.node_id {
            return;
        }
        let text = envelope.frame.to_string();
        self.manager
            .send_local_room(envelope.room_id, &text, envelope.exclude.as_deref());
    }
}

// ============================================================================
// Brokers
// ============================================================================

/// In-process broker for tests and single-machine multi-node setups: every
/// registered fabric receives every publish, like subscribers on one Redis.
#[derive(Default)]
pub struct LoopbackBroker {
    fabrics: RwLock<Vec<Weak<ChatFabric>>>,
}

impl LoopbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, fabric: &Arc<ChatFabric>) {
        self.fabrics.write().push(Arc::downgrade(fabric));
    }
}

#[async_trait]
impl ChatBroker for LoopbackBroker {
    async fn publish(&self, _channel: &str, payload: &str) -> Result<()> {
        let fabrics: Vec<Weak<ChatFabric>> = self.fabrics.read().clone();
        for fabric in fabrics {
            if let Some(fabric) = fabric.upgrade() {
                fabric.handle_incoming(payload);
            }
        }
        Ok(())
    }
}

/// Redis-backed broker.
pub struct RedisChatBroker {
    manager: redis::aio::ConnectionManager,
}

impl RedisChatBroker {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Configuration(format!("invalid Redis URL: {}", e)))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::Network(format!("Redis connection failed: {}", e)))?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl ChatBroker for RedisChatBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::Network(format!("Redis publish failed: {}", e)))
    }
}

/// Singleton listener task: subscribe to every room channel and hand
/// incoming envelopes to the fabric.
pub async fn start_redis_listener(url: &str, fabric: Arc<ChatFabric>) -> Result<JoinHandle<()>> {
    let client = redis::Client::open(url)
        .map_err(|e| AppError::Configuration(format!("invalid Redis URL: {}", e)))?;
    let conn = client
        .get_async_connection()
        .await
        .map_err(|e| AppError::Network(format!("Redis connection failed: {}", e)))?;
    let mut pubsub = conn.into_pubsub();
    pubsub
        .psubscribe("chat:room:*")
        .await
        .map_err(|e| AppError::Network(format!("Redis subscribe failed: {}", e)))?;

    let handle = tokio::spawn(async move {
        let mut stream = pubsub.on_message();
        while let Some(message) = stream.next().await {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(error = %err, "unreadable pub/sub payload");
                    continue;
                }
            };
            fabric.handle_incoming(&payload);
        }
        tracing::info!("room channel listener stopped");
    });
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn node() -> (Arc<ChatFabric>, Arc<ConnectionManager>) {
        let manager = Arc::new(ConnectionManager::new());
        let fabric = Arc::new(ChatFabric::new(manager.clone()));
        (fabric, manager)
    }

    #[tokio::test]
    async fn test_cross_node_delivery_without_echo_duplication() {
        let (node1, manager1) = node();
        let (node2, manager2) = node();
        let broker = Arc::new(LoopbackBroker::new());
        broker.register(&node1);
        broker.register(&node2);
        node1.set_broker(broker.clone());
        node2.set_broker(broker);

        let room = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        manager1.connect("a", Uuid::new_v4(), tx_a);
        manager2.connect("b", Uuid::new_v4(), tx_b);
        manager1.join_room("a", room);
        manager2.join_room("b", room);

        node1
            .broadcast_to_room(room, &json!({"type": "new_message"}), Some("a"))
            .await;

        // Remote node gets exactly one copy.
        let frame = rx_b.recv().await.unwrap();
        assert!(frame.contains("new_message"));
        assert!(rx_b.try_recv().is_err());
        // Originating connection was excluded; no duplicate local delivery
        // from the envelope coming back either.
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_local_delivery_includes_other_local_sockets() {
        let (node1, manager1) = node();
        let room = Uuid::new_v4();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        manager1.connect("a", Uuid::new_v4(), tx_a);
        manager1.connect("b", Uuid::new_v4(), tx_b);
        manager1.join_room("a", room);
        manager1.join_room("b", room);

        node1
            .broadcast_to_room(room, &json!({"type": "typing"}), Some("a"))
            .await;

        assert!(rx_b.recv().await.unwrap().contains("typing"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_dropped() {
        let (node1, _) = node();
        node1.handle_incoming("not json");
    }
}
