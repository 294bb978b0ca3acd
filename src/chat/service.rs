// Chat service: wires the repositories, the connection fabric, presence, the
// content filter, and the WebSocket command protocol.
//
// Every handler failure is caught here and turned into a single error frame
// to the originating socket; the socket stays open and nothing is broadcast.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::CacheManager;
use crate::chat::connections::ConnectionManager;
use crate::chat::filter::ContentFilter;
use crate::chat::model::{MemberRole, Message, MessageType, Room, RoomType};
use crate::chat::protocol::{CommandType, WsCommand, WsResponse};
use crate::chat::pubsub::ChatFabric;
use crate::chat::repository::{
    MemberRepository, MessageRepository, ReactionRepository, RoomRepository,
};
use crate::chat::store::ChatStore;
use crate::error::{AppError, Result};
use crate::metrics::MetricsService;
use crate::security::EncryptionService;

/// Per-user inbound frame budget.
pub const WS_FRAME_LIMIT: i64 = 50;
pub const WS_FRAME_WINDOW_SECS: u64 = 60;

/// Presence TTLs.
pub const ONLINE_TTL_SECS: u64 = 300;
pub const LAST_SEEN_TTL_SECS: u64 = 86400;

/// Message-history page bounds.
pub const HISTORY_DEFAULT_LIMIT: usize = 50;
pub const HISTORY_MAX_LIMIT: usize = 100;

/// Room listing entry for the HTTP surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoomSummary {
    pub id: Uuid,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub created_at: String,
    pub member_count: usize,
    pub user_role: MemberRole,
    pub unread_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Value>,
}

pub struct ChatService {
    pub rooms: RoomRepository,
    pub members: MemberRepository,
    pub messages: MessageRepository,
    pub reactions: ReactionRepository,
    fabric: Arc<ChatFabric>,
    cache: Arc<CacheManager>,
    filter: ContentFilter,
    metrics: RwLock<Option<Arc<MetricsService>>>,
    /// Display names resolved by the (external) user service; absent names
    /// degrade to a short-id form.
    user_names: RwLock<HashMap<Uuid, String>>,
}

impl ChatService {
    pub fn new(
        store: Arc<ChatStore>,
        encryption: Arc<EncryptionService>,
        fabric: Arc<ChatFabric>,
        cache: Arc<CacheManager>,
    ) -> Self {
        Self {
            rooms: RoomRepository::new(store.clone()),
            members: MemberRepository::new(store.clone()),
            messages: MessageRepository::new(store.clone(), encryption),
            reactions: ReactionRepository::new(store),
            fabric,
            cache: cache.clone(),
            filter: ContentFilter::new(cache),
            metrics: RwLock::new(None),
            user_names: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_metrics(&self, metrics: Arc<MetricsService>) {
        *self.metrics.write() = Some(metrics);
    }

    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.fabric.manager()
    }

    pub fn fabric(&self) -> Arc<ChatFabric> {
        self.fabric.clone()
    }

    pub fn set_user_name(&self, user_id: Uuid, name: &str) {
        self.user_names.write().insert(user_id, name.to_string());
    }

    pub fn display_name(&self, user_id: Uuid) -> String {
        self.user_names
            .read()
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| {
                let short = user_id.to_string();
                format!("User {}", &short[..8])
            })
    }

    pub async fn check_room_access(&self, user_id: Uuid, room_id: Uuid) -> bool {
        self.members
            .find_by_room_and_user(room_id, user_id)
            .await
            .map(|m| m.is_active)
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Socket lifecycle
    // ------------------------------------------------------------------

    /// Register the socket, mark the user online, and send the initial
    /// `connected` and `room_list` frames.
    pub async fn on_connect(
        &self,
        connection_id: &str,
        user_id: Uuid,
        sender: mpsc::UnboundedSender<String>,
    ) {
        self.manager().connect(connection_id, user_id, sender);
        self.refresh_presence(user_id).await;
        self.update_connection_gauge();

        self.send_frame(
            connection_id,
            &WsResponse::ok(
                "connected",
                json!({
                    "user_id": user_id,
                    "connection_id": connection_id,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            ),
        );

        let rooms = self.list_rooms(user_id, None, 1, 100).await;
        let rooms_value = serde_json::to_value(&rooms).unwrap_or(Value::Null);
        self.send_frame(
            connection_id,
            &WsResponse::ok("room_list", json!({ "rooms": rooms_value })),
        );
    }

    /// Remove the connection from all indices and record last-seen. Runs on
    /// every exit path of a socket task.
    pub async fn on_disconnect(&self, connection_id: &str) {
        if let Some(user_id) = self.manager().disconnect(connection_id) {
            let _ = self
                .cache
                .set(
                    &format!("user:last_seen:{}", user_id),
                    &Utc::now().to_rfc3339(),
                    Some(Duration::from_secs(LAST_SEEN_TTL_SECS)),
                )
                .await;
        }
        self.update_connection_gauge();
    }

    async fn refresh_presence(&self, user_id: Uuid) {
        let _ = self
            .cache
            .set(
                &format!("user:online:{}", user_id),
                "true",
                Some(Duration::from_secs(ONLINE_TTL_SECS)),
            )
            .await;
    }

    fn update_connection_gauge(&self) {
        if let Some(metrics) = self.metrics.read().clone() {
            metrics.registry().set_gauge(
                "ws_connections_active",
                self.manager().total_connections() as f64,
                &[],
            );
        }
    }

    fn send_frame(&self, connection_id: &str, response: &WsResponse) {
        self.manager().send_to(connection_id, &response.to_text());
    }

    fn error_frame(err: &AppError) -> WsResponse {
        match err {
            AppError::RateLimit {
                limit,
                remaining,
                reset_seconds,
                ..
            } => WsResponse {
                kind: "error".to_string(),
                data: json!({
                    "limit": limit,
                    "remaining": remaining,
                    "reset": reset_seconds,
                }),
                success: false,
                error: Some("Rate limit exceeded".to_string()),
            },
            other => WsResponse::error(other.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Frame handling
    // ------------------------------------------------------------------

    /// Handle one inbound text frame from a socket. All failure modes end in
    /// a single error frame to this connection.
    pub async fn handle_frame(&self, connection_id: &str, text: &str) {
        let Some(user_id) = self.manager().connection_user(connection_id) else {
            return;
        };

        // Per-user frame budget, shared across this user's connections.
        match self
            .cache
            .increment(
                &format!("rate:ws:{}", user_id),
                1,
                Some(Duration::from_secs(WS_FRAME_WINDOW_SECS)),
            )
            .await
        {
            Ok(count) if count > WS_FRAME_LIMIT => {
                tracing::warn!(user = %user_id, count, "websocket frame budget exceeded");
                self.send_frame(connection_id, &WsResponse::error("Rate limit exceeded"));
                return;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "frame rate limiter unavailable");
            }
        }

        self.refresh_presence(user_id).await;

        let command: WsCommand = match serde_json::from_str(text) {
            Ok(command) => command,
            Err(err) => {
                tracing::debug!(connection = connection_id, error = %err, "invalid frame");
                let message = if serde_json::from_str::<Value>(text).is_err() {
                    "Invalid JSON"
                } else {
                    "Invalid command"
                };
                self.send_frame(connection_id, &WsResponse::error(message));
                return;
            }
        };

        let kind = command.command;
        let outcome = self.process_command(connection_id, user_id, command).await;
        if let Some(metrics) = self.metrics.read().clone() {
            let label = format!("{:?}", kind);
            let success = if outcome.is_ok() { "true" } else { "false" };
            metrics.registry().increment_counter(
                "ws_messages_total",
                1.0,
                &[("command", &label), ("success", success)],
            );
        }
        if let Err(err) = outcome {
            self.send_frame(connection_id, &Self::error_frame(&err));
        }
    }

    async fn process_command(
        &self,
        connection_id: &str,
        user_id: Uuid,
        command: WsCommand,
    ) -> Result<()> {
        match command.command {
            CommandType::JoinRoom => self.handle_join_room(connection_id, user_id, &command).await,
            CommandType::LeaveRoom => {
                self.handle_leave_room(connection_id, user_id, &command).await
            }
            CommandType::SendMessage => {
                self.handle_send_message(connection_id, user_id, &command).await
            }
            CommandType::ReadMessages => {
                self.handle_read_messages(connection_id, user_id, &command).await
            }
            CommandType::TypingStart | CommandType::TypingStop => {
                self.handle_typing(connection_id, user_id, &command).await
            }
            CommandType::FetchHistory => {
                self.handle_fetch_history(connection_id, user_id, &command).await
            }
            CommandType::AddReaction | CommandType::RemoveReaction => {
                self.handle_reaction(connection_id, user_id, &command).await
            }
            CommandType::EditMessage => {
                self.handle_edit_message(connection_id, user_id, &command).await
            }
            CommandType::DeleteMessage => {
                self.handle_delete_message(connection_id, user_id, &command).await
            }
        }
    }

    fn required_room(&self, command: &WsCommand) -> Result<Uuid> {
        command
            .room_id()
            .ok_or_else(|| AppError::validation("Room ID is required"))
    }

    async fn ensure_member(&self, user_id: Uuid, room_id: Uuid) -> Result<()> {
        if self.check_room_access(user_id, room_id).await {
            Ok(())
        } else {
            Err(AppError::PermissionDenied("Access denied to room".into()))
        }
    }

    async fn handle_join_room(
        &self,
        connection_id: &str,
        user_id: Uuid,
        command: &WsCommand,
    ) -> Result<()> {
        let room_id = self.required_room(command)?;
        self.ensure_member(user_id, room_id).await?;

        self.manager().join_room(connection_id, room_id);
        let info = self.room_info(room_id).await?;
        self.send_frame(connection_id, &WsResponse::ok("room_joined", info));

        self.fabric
            .broadcast_to_room(
                room_id,
                &WsResponse::ok(
                    "user_joined",
                    json!({
                        "room_id": room_id,
                        "user": {"id": user_id, "name": self.display_name(user_id)},
                    }),
                )
                .to_frame(),
                Some(connection_id),
            )
            .await;
        Ok(())
    }

    async fn handle_leave_room(
        &self,
        connection_id: &str,
        user_id: Uuid,
        command: &WsCommand,
    ) -> Result<()> {
        let room_id = self.required_room(command)?;
        self.manager().leave_room(connection_id, room_id);
        self.send_frame(
            connection_id,
            &WsResponse::ok("room_left", json!({"room_id": room_id})),
        );
        self.fabric
            .broadcast_to_room(
                room_id,
                &WsResponse::ok(
                    "user_left",
                    json!({"room_id": room_id, "user_id": user_id}),
                )
                .to_frame(),
                Some(connection_id),
            )
            .await;
        Ok(())
    }

    fn message_payload(&self, message: &Message, content: &str) -> Value {
        json!({
            "id": message.id,
            "room_id": message.room_id,
            "sender_id": message.sender_id,
            "sender_name": self.display_name(message.sender_id),
            "message_type": message.message_type,
            "content": content,
            "created_at": message.created_at.to_rfc3339(),
            "updated_at": message.updated_at.to_rfc3339(),
            "metadata": message.metadata,
        })
    }

    async fn handle_send_message(
        &self,
        connection_id: &str,
        user_id: Uuid,
        command: &WsCommand,
    ) -> Result<()> {
        let room_id = self.required_room(command)?;
        let content = command
            .data_str("content")
            .ok_or_else(|| AppError::validation("Room ID and content are required"))?;
        self.ensure_member(user_id, room_id).await?;

        let message_type = command
            .data_str("message_type")
            .and_then(|raw| serde_json::from_value(Value::String(raw.to_string())).ok())
            .unwrap_or(MessageType::Text);
        let metadata = command.data.get("metadata").cloned().unwrap_or(Value::Null);

        let filtered = self.filter.filter(content).await;
        let message = self
            .messages
            .send_message(room_id, user_id, &filtered, message_type, metadata)
            .await?;

        let payload = self.message_payload(&message, &filtered);
        self.send_frame(
            connection_id,
            &WsResponse::ok("message_sent", payload.clone()),
        );
        self.fabric
            .broadcast_to_room(
                room_id,
                &WsResponse::ok("new_message", payload).to_frame(),
                Some(connection_id),
            )
            .await;
        Ok(())
    }

    async fn handle_read_messages(
        &self,
        connection_id: &str,
        user_id: Uuid,
        command: &WsCommand,
    ) -> Result<()> {
        let room_id = self.required_room(command)?;
        let last_read_id = command
            .data_uuid("last_read_id")
            .ok_or_else(|| AppError::validation("Room ID and last_read_id are required"))?;
        self.ensure_member(user_id, room_id).await?;

        let message = self
            .messages
            .get(last_read_id)
            .await
            .ok_or_else(|| AppError::not_found("ChatMessage", last_read_id))?;
        self.members
            .update_last_read(room_id, user_id, Some(message.created_at))
            .await;

        self.send_frame(
            connection_id,
            &WsResponse::ok(
                "messages_read",
                json!({"room_id": room_id, "last_read_id": last_read_id}),
            ),
        );
        Ok(())
    }

    async fn handle_typing(
        &self,
        connection_id: &str,
        user_id: Uuid,
        command: &WsCommand,
    ) -> Result<()> {
        let room_id = self.required_room(command)?;
        self.ensure_member(user_id, room_id).await?;

        let (kind, data) = if command.command == CommandType::TypingStart {
            (
                "user_typing",
                json!({
                    "room_id": room_id,
                    "user_id": user_id,
                    "user_name": self.display_name(user_id),
                }),
            )
        } else {
            (
                "user_typing_stopped",
                json!({"room_id": room_id, "user_id": user_id}),
            )
        };
        self.fabric
            .broadcast_to_room(room_id, &WsResponse::ok(kind, data).to_frame(), Some(connection_id))
            .await;
        Ok(())
    }

    async fn handle_fetch_history(
        &self,
        connection_id: &str,
        user_id: Uuid,
        command: &WsCommand,
    ) -> Result<()> {
        let room_id = self.required_room(command)?;
        self.ensure_member(user_id, room_id).await?;

        let limit = command
            .data_usize("limit")
            .unwrap_or(HISTORY_DEFAULT_LIMIT)
            .clamp(1, HISTORY_MAX_LIMIT);
        let before_id = command.data_uuid("before_id");
        let include_deleted = command
            .data
            .get("include_deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let messages = self
            .messages
            .get_room_messages(room_id, limit, before_id, include_deleted)
            .await;
        let payload: Vec<Value> = messages
            .iter()
            .map(|m| {
                let content = self.messages.decrypt_content(m);
                let mut value = self.message_payload(m, &content);
                value["is_deleted"] = Value::Bool(m.is_deleted);
                value
            })
            .collect();

        self.send_frame(
            connection_id,
            &WsResponse::ok(
                "message_history",
                json!({"room_id": room_id, "messages": payload}),
            ),
        );
        Ok(())
    }

    async fn handle_reaction(
        &self,
        connection_id: &str,
        user_id: Uuid,
        command: &WsCommand,
    ) -> Result<()> {
        let room_id = self.required_room(command)?;
        let message_id = command
            .data_uuid("message_id")
            .ok_or_else(|| AppError::validation("Room ID, message ID, and reaction are required"))?;
        let reaction = command
            .data_str("reaction")
            .ok_or_else(|| AppError::validation("Room ID, message ID, and reaction are required"))?
            .to_string();
        self.ensure_member(user_id, room_id).await?;

        let kind = if command.command == CommandType::AddReaction {
            self.reactions
                .add_reaction(message_id, user_id, &reaction)
                .await?;
            "reaction_added"
        } else {
            if !self
                .reactions
                .remove_reaction(message_id, user_id, &reaction)
                .await?
            {
                return Err(AppError::validation("Failed to remove reaction"));
            }
            "reaction_removed"
        };

        let data = json!({
            "room_id": room_id,
            "message_id": message_id,
            "reaction": reaction,
            "user_id": user_id,
            "user_name": self.display_name(user_id),
        });
        self.send_frame(connection_id, &WsResponse::ok(kind, data.clone()));
        self.fabric
            .broadcast_to_room(room_id, &WsResponse::ok(kind, data).to_frame(), Some(connection_id))
            .await;
        Ok(())
    }

    async fn handle_edit_message(
        &self,
        connection_id: &str,
        user_id: Uuid,
        command: &WsCommand,
    ) -> Result<()> {
        let room_id = self.required_room(command)?;
        let message_id = command
            .data_uuid("message_id")
            .ok_or_else(|| AppError::validation("Room ID, message ID, and content are required"))?;
        let content = command
            .data_str("content")
            .ok_or_else(|| AppError::validation("Room ID, message ID, and content are required"))?;

        let filtered = self.filter.filter(content).await;
        let updated = self
            .messages
            .edit_message(message_id, &filtered, user_id)
            .await?
            .ok_or_else(|| AppError::not_found("ChatMessage", message_id))?;

        let data = json!({
            "id": updated.id,
            "room_id": room_id,
            "content": filtered,
            "updated_at": updated.updated_at.to_rfc3339(),
            "is_edited": true,
        });
        self.send_frame(connection_id, &WsResponse::ok("message_edited", data.clone()));
        self.fabric
            .broadcast_to_room(
                room_id,
                &WsResponse::ok("message_edited", data).to_frame(),
                Some(connection_id),
            )
            .await;
        Ok(())
    }

    async fn handle_delete_message(
        &self,
        connection_id: &str,
        user_id: Uuid,
        command: &WsCommand,
    ) -> Result<()> {
        let room_id = self.required_room(command)?;
        let message_id = command
            .data_uuid("message_id")
            .ok_or_else(|| AppError::validation("Room ID and message ID are required"))?;

        self.messages
            .delete_message(message_id, user_id)
            .await?
            .ok_or_else(|| AppError::not_found("ChatMessage", message_id))?;

        let data = json!({"room_id": room_id, "message_id": message_id});
        self.send_frame(
            connection_id,
            &WsResponse::ok("message_deleted", data.clone()),
        );
        self.fabric
            .broadcast_to_room(
                room_id,
                &WsResponse::ok("message_deleted", data).to_frame(),
                Some(connection_id),
            )
            .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // HTTP-surface operations
    // ------------------------------------------------------------------

    pub async fn list_rooms(
        &self,
        user_id: Uuid,
        room_type: Option<RoomType>,
        page: usize,
        page_size: usize,
    ) -> Vec<RoomSummary> {
        let room_page = self
            .rooms
            .get_rooms_for_user(user_id, room_type, page, page_size)
            .await;

        let mut summaries = Vec::with_capacity(room_page.rooms.len());
        for room in room_page.rooms {
            let members = self.members.get_by_room(room.id, true).await;
            let user_role = members
                .iter()
                .find(|m| m.user_id == user_id)
                .map(|m| m.role)
                .unwrap_or(MemberRole::Member);
            let unread_count = self.messages.unread_count(room.id, user_id).await;
            let last_message = match self.messages.last_message(room.id).await {
                Some(message) => {
                    let content = self.messages.decrypt_content(&message);
                    Some(self.message_payload(&message, &content))
                }
                None => None,
            };
            summaries.push(RoomSummary {
                id: room.id,
                name: room.name.clone(),
                room_type: room.room_type,
                created_at: room.created_at.to_rfc3339(),
                member_count: members.len(),
                user_role,
                unread_count,
                last_message,
            });
        }
        summaries
    }

    pub async fn room_info(&self, room_id: Uuid) -> Result<Value> {
        let room = self.rooms.ensure_exists(room_id).await?;
        let members = self.members.get_by_room(room_id, true).await;
        Ok(json!({
            "room_id": room.id,
            "name": room.name,
            "type": room.room_type,
            "created_at": room.created_at.to_rfc3339(),
            "member_count": members.len(),
            "members": members
                .iter()
                .map(|m| json!({
                    "user_id": m.user_id,
                    "role": m.role,
                    "last_read_at": m.last_read_at.map(|t| t.to_rfc3339()),
                }))
                .collect::<Vec<_>>(),
        }))
    }

    /// Returns the existing direct chat with the target or creates one.
    /// The boolean is true when a new room was created.
    pub async fn get_or_create_direct_chat(
        &self,
        user_id: Uuid,
        other_user_id: Uuid,
    ) -> Result<(Room, bool)> {
        if let Some(existing) = self.rooms.find_direct_chat(user_id, other_user_id).await {
            return Ok((existing, false));
        }
        let (room, _) = self.rooms.create_direct_chat(user_id, other_user_id).await?;
        Ok((room, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;
    use crate::chat::pubsub::LoopbackBroker;
    use crate::config::Settings;

    fn build_service() -> (Arc<ChatService>, Arc<ConnectionManager>) {
        let store = Arc::new(ChatStore::new());
        let manager = Arc::new(ConnectionManager::new());
        let fabric = Arc::new(ChatFabric::new(manager.clone()));
        let cache = Arc::new(CacheManager::new());
        cache.register_backend("memory", Arc::new(MemoryCacheBackend::new()));
        let encryption = Arc::new(
            EncryptionService::new(Settings::default().encryption_master_key.expose()).unwrap(),
        );
        (
            Arc::new(ChatService::new(store, encryption, fabric, cache)),
            manager,
        )
    }

    async fn connect(
        service: &ChatService,
        user: Uuid,
        conn: &str,
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        service.on_connect(conn, user, tx).await;
        // Drain the connected + room_list frames.
        assert!(rx.recv().await.unwrap().contains("connected"));
        assert!(rx.recv().await.unwrap().contains("room_list"));
        rx
    }

    #[tokio::test]
    async fn test_join_requires_membership() {
        let (service, _) = build_service();
        let user = Uuid::new_v4();
        let mut rx = connect(&service, user, "c1").await;

        let room = Uuid::new_v4();
        service
            .handle_frame(
                "c1",
                &json!({"command": "join_room", "room_id": room}).to_string(),
            )
            .await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("error"));
        assert!(frame.contains("Access denied"));
    }

    #[tokio::test]
    async fn test_send_message_echo_and_broadcast() {
        let (service, _) = build_service();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (room, _) = service.rooms.create_direct_chat(alice, bob).await.unwrap();

        let mut rx_a = connect(&service, alice, "ca").await;
        let mut rx_b = connect(&service, bob, "cb").await;

        for (conn, rx) in [("ca", &mut rx_a), ("cb", &mut rx_b)] {
            service
                .handle_frame(
                    conn,
                    &json!({"command": "join_room", "room_id": room.id}).to_string(),
                )
                .await;
            assert!(rx.recv().await.unwrap().contains("room_joined"));
        }
        // Bob saw alice already in? No join broadcast for alice (she joined
        // first, bob wasn't in the room set yet); bob's join reaches alice.
        assert!(rx_a.recv().await.unwrap().contains("user_joined"));

        service
            .handle_frame(
                "ca",
                &json!({
                    "command": "send_message",
                    "room_id": room.id,
                    "data": {"content": "hello"}
                })
                .to_string(),
            )
            .await;

        let echo = rx_a.recv().await.unwrap();
        assert!(echo.contains("message_sent"));
        assert!(echo.contains("hello"));

        let broadcast = rx_b.recv().await.unwrap();
        assert!(broadcast.contains("new_message"));
        assert!(broadcast.contains("hello"));
        // No further frames for either side.
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_json_yields_error_frame() {
        let (service, _) = build_service();
        let user = Uuid::new_v4();
        let mut rx = connect(&service, user, "c1").await;

        service.handle_frame("c1", "{nonsense").await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("Invalid JSON"));
    }

    #[tokio::test]
    async fn test_frame_budget_exhaustion() {
        let (service, _) = build_service();
        let user = Uuid::new_v4();
        let mut rx = connect(&service, user, "c1").await;

        // 50 valid-but-denied frames consume the budget...
        for _ in 0..WS_FRAME_LIMIT {
            service
                .handle_frame(
                    "c1",
                    &json!({"command": "leave_room", "room_id": Uuid::new_v4()}).to_string(),
                )
                .await;
        }
        for _ in 0..(WS_FRAME_LIMIT * 2) {
            let _ = rx.try_recv();
        }
        // ...so the 51st is rejected outright.
        service
            .handle_frame(
                "c1",
                &json!({"command": "leave_room", "room_id": Uuid::new_v4()}).to_string(),
            )
            .await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.contains("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn test_direct_chat_get_or_create_idempotent() {
        let (service, _) = build_service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (room1, created1) = service.get_or_create_direct_chat(a, b).await.unwrap();
        let (room2, created2) = service.get_or_create_direct_chat(a, b).await.unwrap();
        assert!(created1);
        assert!(!created2);
        assert_eq!(room1.id, room2.id);
    }

    #[tokio::test]
    async fn test_cross_node_hello_scenario() {
        // Two nodes, one broker; user A on node 1, user B on node 2.
        let store = Arc::new(ChatStore::new());
        let cache = Arc::new(CacheManager::new());
        cache.register_backend("memory", Arc::new(MemoryCacheBackend::new()));
        let encryption = Arc::new(
            EncryptionService::new(Settings::default().encryption_master_key.expose()).unwrap(),
        );

        let fabric1 = Arc::new(ChatFabric::new(Arc::new(ConnectionManager::new())));
        let fabric2 = Arc::new(ChatFabric::new(Arc::new(ConnectionManager::new())));
        let broker = Arc::new(LoopbackBroker::new());
        broker.register(&fabric1);
        broker.register(&fabric2);
        fabric1.set_broker(broker.clone());
        fabric2.set_broker(broker);

        let node1 = Arc::new(ChatService::new(
            store.clone(),
            encryption.clone(),
            fabric1,
            cache.clone(),
        ));
        let node2 = Arc::new(ChatService::new(store, encryption, fabric2, cache));

        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (room, _) = node1.rooms.create_direct_chat(alice, bob).await.unwrap();

        let mut rx_a = connect(&node1, alice, "a1").await;
        let mut rx_b = connect(&node2, bob, "b1").await;

        node1
            .handle_frame(
                "a1",
                &json!({"command": "join_room", "room_id": room.id}).to_string(),
            )
            .await;
        node2
            .handle_frame(
                "b1",
                &json!({"command": "join_room", "room_id": room.id}).to_string(),
            )
            .await;
        assert!(rx_a.recv().await.unwrap().contains("room_joined"));
        assert!(rx_b.recv().await.unwrap().contains("room_joined"));
        // Bob's join was broadcast to alice across nodes.
        assert!(rx_a.recv().await.unwrap().contains("user_joined"));

        node1
            .handle_frame(
                "a1",
                &json!({
                    "command": "send_message",
                    "room_id": room.id,
                    "data": {"content": "hello"}
                })
                .to_string(),
            )
            .await;

        // A sees exactly one echo.
        let echo = rx_a.recv().await.unwrap();
        assert!(echo.contains("message_sent"));
        assert!(rx_a.try_recv().is_err());

        // B sees exactly one new_message with the body.
        let frame = rx_b.recv().await.unwrap();
        assert!(frame.contains("new_message"));
        assert!(frame.contains("hello"));
        assert!(rx_b.try_recv().is_err());
    }
}
