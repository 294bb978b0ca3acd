// Chat table storage.
//
// One process-local set of tables shared by the repositories. Locks are held
// only for the duration of a query or mutation, never across an await point.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::chat::model::{Member, Message, RateLimitEntry, Reaction, Room};

#[derive(Default)]
pub struct ChatStore {
    pub(crate) rooms: RwLock<HashMap<Uuid, Room>>,
    pub(crate) members: RwLock<Vec<Member>>,
    pub(crate) messages: RwLock<HashMap<Uuid, Message>>,
    pub(crate) reactions: RwLock<Vec<Reaction>>,
    pub(crate) rate_limit_log: RwLock<Vec<RateLimitEntry>>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room(&self, id: Uuid) -> Option<Room> {
        self.rooms
            .read()
            .get(&id)
            .filter(|r| !r.is_deleted)
            .cloned()
    }

    pub fn touch_room(&self, id: Uuid, at: DateTime<Utc>) {
        if let Some(room) = self.rooms.write().get_mut(&id) {
            room.updated_at = at;
        }
    }

    pub fn member(&self, room_id: Uuid, user_id: Uuid) -> Option<Member> {
        self.members
            .read()
            .iter()
            .find(|m| m.room_id == room_id && m.user_id == user_id && !m.is_deleted)
            .cloned()
    }

    pub fn message(&self, id: Uuid) -> Option<Message> {
        self.messages.read().get(&id).cloned()
    }

    /// Drop rate-limit rows older than the retention horizon. The log is
    /// append-only within a window; this keeps it bounded.
    pub fn prune_rate_limit_log(&self, horizon: DateTime<Utc>) {
        self.rate_limit_log
            .write()
            .retain(|entry| entry.timestamp >= horizon);
    }
}
