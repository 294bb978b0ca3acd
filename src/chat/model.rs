// Chat domain records.
//
// Message content is always encrypted at rest; `content_encrypted` holds the
// envelope produced by the security core. Members, messages, and reactions
// are soft-deleted: rows stay for thread integrity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Direct,
    Group,
    Company,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
    Guest,
}

impl MemberRole {
    /// Owners and admins hold moderation rights.
    pub fn can_moderate(&self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
    System,
    Action,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: Option<String>,
    pub room_type: RoomType,
    pub company_id: Option<Uuid>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Value,
}

impl Room {
    pub fn new(name: Option<String>, room_type: RoomType, company_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            room_type,
            company_id,
            is_active: true,
            is_deleted: false,
            created_at: now,
            updated_at: now,
            metadata: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub is_active: bool,
    pub is_deleted: bool,
    pub last_read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Member {
    pub fn new(room_id: Uuid, user_id: Uuid, role: MemberRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            user_id,
            role,
            is_active: true,
            is_deleted: false,
            last_read_at: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub message_type: MessageType,
    /// Envelope ciphertext; never plaintext at rest.
    pub content_encrypted: String,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub reaction: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only rolling-window entry backing the chat rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub user_id: Uuid,
    pub room_id: Uuid,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
}
