// Chat persistence layer: one repository per aggregate root.
//
// Soft-delete is enforced here, at the repository boundary: every query
// excludes deleted rows unless explicitly told otherwise.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::chat::model::{Member, MemberRole, Message, MessageType, Reaction, Room, RoomType};
use crate::chat::rate_limit::RateLimiter;
use crate::chat::store::ChatStore;
use crate::error::{AppError, Result};
use crate::security::EncryptionService;

/// Sentinel returned when history decryption fails; a bad envelope must not
/// abort a history fetch.
pub const CONTENT_UNAVAILABLE: &str = "[unavailable]";

/// A page of rooms plus the total count before paging.
#[derive(Debug, Clone)]
pub struct RoomPage {
    pub rooms: Vec<Room>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

// ============================================================================
// Rooms
// ============================================================================

pub struct RoomRepository {
    store: Arc<ChatStore>,
}

impl RoomRepository {
    pub fn new(store: Arc<ChatStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, room_id: Uuid) -> Option<Room> {
        self.store.room(room_id)
    }

    pub async fn ensure_exists(&self, room_id: Uuid) -> Result<Room> {
        self.store
            .room(room_id)
            .ok_or_else(|| AppError::not_found("ChatRoom", room_id))
    }

    /// The unique active direct room between two users, if one exists.
    pub async fn find_direct_chat(&self, user1: Uuid, user2: Uuid) -> Option<Room> {
        let rooms = self.store.rooms.read();
        let members = self.store.members.read();
        rooms
            .values()
            .filter(|room| {
                room.room_type == RoomType::Direct && room.is_active && !room.is_deleted
            })
            .find(|room| {
                let mut has1 = false;
                let mut has2 = false;
                for member in members.iter() {
                    if member.room_id == room.id && member.is_active && !member.is_deleted {
                        if member.user_id == user1 {
                            has1 = true;
                        }
                        if member.user_id == user2 {
                            has2 = true;
                        }
                    }
                }
                has1 && has2
            })
            .cloned()
    }

    /// Rooms the user is an active member of, newest activity first.
    pub async fn get_rooms_for_user(
        &self,
        user_id: Uuid,
        room_type: Option<RoomType>,
        page: usize,
        page_size: usize,
    ) -> RoomPage {
        let member_rooms: HashSet<Uuid> = {
            let members = self.store.members.read();
            members
                .iter()
                .filter(|m| m.user_id == user_id && m.is_active && !m.is_deleted)
                .map(|m| m.room_id)
                .collect()
        };

        let mut rooms: Vec<Room> = {
            let rooms = self.store.rooms.read();
            rooms
                .values()
                .filter(|room| {
                    member_rooms.contains(&room.id)
                        && room.is_active
                        && !room.is_deleted
                        && room_type.map(|t| room.room_type == t).unwrap_or(true)
                })
                .cloned()
                .collect()
        };
        rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Self::paginate(rooms, page, page_size)
    }

    pub async fn get_company_rooms(
        &self,
        company_id: Uuid,
        page: usize,
        page_size: usize,
    ) -> RoomPage {
        let mut rooms: Vec<Room> = {
            let rooms = self.store.rooms.read();
            rooms
                .values()
                .filter(|room| {
                    room.company_id == Some(company_id) && room.is_active && !room.is_deleted
                })
                .cloned()
                .collect()
        };
        rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Self::paginate(rooms, page, page_size)
    }

    fn paginate(rooms: Vec<Room>, page: usize, page_size: usize) -> RoomPage {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 100);
        let total = rooms.len();
        let rooms = rooms
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();
        RoomPage {
            rooms,
            total,
            page,
            page_size,
        }
    }

    /// Create the direct room between two users. Refuses if one already
    /// exists; the room and both member rows are inserted together.
    pub async fn create_direct_chat(
        &self,
        user1: Uuid,
        user2: Uuid,
    ) -> Result<(Room, Vec<Member>)> {
        if let Some(existing) = self.find_direct_chat(user1, user2).await {
            return Err(AppError::business(
                format!(
                    "Direct chat already exists between these users: {}",
                    existing.id
                ),
                "direct_chat_exists",
            ));
        }
        let room = Room::new(None, RoomType::Direct, None);
        let member1 = Member::new(room.id, user1, MemberRole::Member);
        let member2 = Member::new(room.id, user2, MemberRole::Member);
        {
            let mut rooms = self.store.rooms.write();
            let mut members = self.store.members.write();
            rooms.insert(room.id, room.clone());
            members.push(member1.clone());
            members.push(member2.clone());
        }
        Ok((room, vec![member1, member2]))
    }

    /// Create a group room. The member set is deduplicated and always
    /// includes the creator, who gets the owner role.
    pub async fn create_group_chat(
        &self,
        name: &str,
        creator_id: Uuid,
        member_ids: Vec<Uuid>,
        company_id: Option<Uuid>,
    ) -> Result<(Room, Vec<Member>)> {
        let mut unique: HashSet<Uuid> = member_ids.into_iter().collect();
        unique.insert(creator_id);

        let room_type = if company_id.is_some() {
            RoomType::Company
        } else {
            RoomType::Group
        };
        let room = Room::new(Some(name.to_string()), room_type, company_id);

        let new_members: Vec<Member> = unique
            .into_iter()
            .map(|user_id| {
                let role = if user_id == creator_id {
                    MemberRole::Owner
                } else {
                    MemberRole::Member
                };
                Member::new(room.id, user_id, role)
            })
            .collect();

        {
            let mut rooms = self.store.rooms.write();
            let mut members = self.store.members.write();
            rooms.insert(room.id, room.clone());
            members.extend(new_members.iter().cloned());
        }
        Ok((room, new_members))
    }

    /// Add members to a group room. Direct rooms refuse; when `added_by` is
    /// given the adder must be owner or admin. Existing members are skipped.
    pub async fn add_members(
        &self,
        room_id: Uuid,
        user_ids: Vec<Uuid>,
        role: MemberRole,
        added_by: Option<Uuid>,
    ) -> Result<Vec<Member>> {
        let room = self.ensure_exists(room_id).await?;

        if let Some(adder_id) = added_by {
            if room.room_type == RoomType::Direct {
                return Err(AppError::business(
                    "Cannot add members to a direct chat",
                    "direct_chat_members_fixed",
                ));
            }
            let adder = self.store.member(room_id, adder_id);
            if !adder.map(|m| m.role.can_moderate()).unwrap_or(false) {
                return Err(AppError::PermissionDenied(
                    "You don't have permission to add members to this chat".into(),
                ));
            }
        }

        let existing: HashSet<Uuid> = {
            let members = self.store.members.read();
            members
                .iter()
                .filter(|m| m.room_id == room_id && !m.is_deleted)
                .map(|m| m.user_id)
                .collect()
        };

        let new_members: Vec<Member> = user_ids
            .into_iter()
            .filter(|user_id| !existing.contains(user_id))
            .map(|user_id| Member::new(room_id, user_id, role))
            .collect();

        if !new_members.is_empty() {
            self.store
                .members
                .write()
                .extend(new_members.iter().cloned());
        }
        Ok(new_members)
    }
}

// ============================================================================
// Members
// ============================================================================

pub struct MemberRepository {
    store: Arc<ChatStore>,
}

impl MemberRepository {
    pub fn new(store: Arc<ChatStore>) -> Self {
        Self { store }
    }

    pub async fn find_by_room_and_user(&self, room_id: Uuid, user_id: Uuid) -> Option<Member> {
        self.store.member(room_id, user_id)
    }

    pub async fn get_by_room(&self, room_id: Uuid, active_only: bool) -> Vec<Member> {
        self.store
            .members
            .read()
            .iter()
            .filter(|m| m.room_id == room_id && !m.is_deleted && (!active_only || m.is_active))
            .cloned()
            .collect()
    }

    pub async fn get_by_user(&self, user_id: Uuid) -> Vec<Member> {
        self.store
            .members
            .read()
            .iter()
            .filter(|m| m.user_id == user_id && m.is_active && !m.is_deleted)
            .cloned()
            .collect()
    }

    /// Idempotent for any fixed timestamp; a missing member returns None.
    pub async fn update_last_read(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        timestamp: Option<DateTime<Utc>>,
    ) -> Option<Member> {
        let timestamp = timestamp.unwrap_or_else(Utc::now);
        let mut members = self.store.members.write();
        let member = members
            .iter_mut()
            .find(|m| m.room_id == room_id && m.user_id == user_id && !m.is_deleted)?;
        member.last_read_at = Some(timestamp);
        Some(member.clone())
    }

    fn active_owner_count(members: &[Member], room_id: Uuid) -> usize {
        members
            .iter()
            .filter(|m| {
                m.room_id == room_id
                    && m.role == MemberRole::Owner
                    && m.is_active
                    && !m.is_deleted
            })
            .count()
    }

    /// Change a member's role. The updater must be owner or admin; an admin
    /// cannot touch an owner; the last owner cannot be demoted.
    pub async fn update_role(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        new_role: MemberRole,
        updated_by: Uuid,
    ) -> Result<Option<Member>> {
        let updater = self.store.member(room_id, updated_by);
        let Some(updater) = updater else {
            return Err(AppError::PermissionDenied(
                "You don't have permission to update member roles".into(),
            ));
        };
        if !updater.role.can_moderate() {
            return Err(AppError::PermissionDenied(
                "You don't have permission to update member roles".into(),
            ));
        }

        let mut members = self.store.members.write();
        let Some(index) = members
            .iter()
            .position(|m| m.room_id == room_id && m.user_id == user_id && !m.is_deleted)
        else {
            return Ok(None);
        };

        let current_role = members[index].role;
        if updater.role == MemberRole::Admin && current_role == MemberRole::Owner {
            return Err(AppError::PermissionDenied(
                "Administrators cannot change the role of the room owner".into(),
            ));
        }
        if new_role == MemberRole::Owner && updater.role != MemberRole::Owner {
            return Err(AppError::PermissionDenied(
                "Only an owner can transfer ownership".into(),
            ));
        }
        if current_role == MemberRole::Owner
            && new_role != MemberRole::Owner
            && Self::active_owner_count(&members, room_id) == 1
        {
            return Err(AppError::business(
                "The last owner cannot be demoted; transfer ownership first",
                "last_owner",
            ));
        }

        members[index].role = new_role;
        Ok(Some(members[index].clone()))
    }

    /// Remove (deactivate) a member. Self-removal is always allowed; others
    /// require owner/admin, and an admin cannot remove owners or peer admins.
    pub async fn remove_member(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        removed_by: Uuid,
    ) -> Result<bool> {
        let target = self.store.member(room_id, user_id);
        let Some(target) = target else {
            return Ok(false);
        };

        if user_id != removed_by {
            let remover = self.store.member(room_id, removed_by);
            let Some(remover) = remover else {
                return Err(AppError::PermissionDenied(
                    "You don't have permission to remove members from this chat".into(),
                ));
            };
            if !remover.role.can_moderate() {
                return Err(AppError::PermissionDenied(
                    "You don't have permission to remove members from this chat".into(),
                ));
            }
            if remover.role == MemberRole::Admin && target.role.can_moderate() {
                return Err(AppError::PermissionDenied(
                    "Administrators cannot remove owners or other administrators".into(),
                ));
            }
        }

        let mut members = self.store.members.write();
        if let Some(member) = members
            .iter_mut()
            .find(|m| m.room_id == room_id && m.user_id == user_id && !m.is_deleted)
        {
            member.is_active = false;
            member.is_deleted = true;
            return Ok(true);
        }
        Ok(false)
    }
}

// ============================================================================
// Messages
// ============================================================================

pub struct MessageRepository {
    store: Arc<ChatStore>,
    encryption: Arc<EncryptionService>,
    rate_limiter: RateLimiter,
}

impl MessageRepository {
    pub fn new(store: Arc<ChatStore>, encryption: Arc<EncryptionService>) -> Self {
        let rate_limiter = RateLimiter::new(store.clone());
        Self {
            store,
            encryption,
            rate_limiter,
        }
    }

    pub async fn get(&self, message_id: Uuid) -> Option<Message> {
        self.store.message(message_id)
    }

    /// Decrypt for presentation; a failed envelope yields the sentinel
    /// instead of aborting the fetch.
    pub fn decrypt_content(&self, message: &Message) -> String {
        self.encryption
            .decrypt_text(&message.content_encrypted)
            .unwrap_or_else(|err| {
                tracing::warn!(message_id = %message.id, error = %err, "message decryption failed");
                CONTENT_UNAVAILABLE.to_string()
            })
    }

    /// History strictly before `before_id` (by that message's timestamp),
    /// returned in ascending chronological order.
    pub async fn get_room_messages(
        &self,
        room_id: Uuid,
        limit: usize,
        before_id: Option<Uuid>,
        include_deleted: bool,
    ) -> Vec<Message> {
        let cursor = before_id.and_then(|id| self.store.message(id)).map(|m| m.created_at);

        let mut messages: Vec<Message> = {
            let messages = self.store.messages.read();
            messages
                .values()
                .filter(|m| m.room_id == room_id)
                .filter(|m| include_deleted || !m.is_deleted)
                .filter(|m| cursor.map(|at| m.created_at < at).unwrap_or(true))
                .cloned()
                .collect()
        };
        // Newest first to apply the limit at the cursor end, then flipped
        // back to chronological order.
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit);
        messages.reverse();
        messages
    }

    /// Persist one message: rate-limit the sender, verify active membership,
    /// encrypt content, advance the sender's last-read and the room clock.
    pub async fn send_message(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
        message_type: MessageType,
        metadata: Value,
    ) -> Result<Message> {
        self.rate_limiter
            .check_default(sender_id, room_id, "send_message")?;

        let room = self
            .store
            .room(room_id)
            .ok_or_else(|| AppError::not_found("ChatRoom", room_id))?;

        let member = self.store.member(room_id, sender_id);
        if !member.map(|m| m.is_active).unwrap_or(false) {
            return Err(AppError::PermissionDenied(
                "You are not a member of this chat room".into(),
            ));
        }

        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            room_id,
            sender_id,
            message_type,
            content_encrypted: self.encryption.encrypt_text(content)?,
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
            metadata,
        };

        {
            let mut messages = self.store.messages.write();
            messages.insert(message.id, message.clone());
        }
        {
            let mut members = self.store.members.write();
            if let Some(m) = members
                .iter_mut()
                .find(|m| m.room_id == room_id && m.user_id == sender_id && !m.is_deleted)
            {
                m.last_read_at = Some(now);
            }
        }
        self.store.touch_room(room.id, now);
        Ok(message)
    }

    /// Only the sender may edit. Edits keep the message id and advance
    /// `updated_at`.
    pub async fn edit_message(
        &self,
        message_id: Uuid,
        new_content: &str,
        edited_by: Uuid,
    ) -> Result<Option<Message>> {
        let Some(current) = self.store.message(message_id) else {
            return Ok(None);
        };
        if current.is_deleted {
            return Ok(None);
        }
        if current.sender_id != edited_by {
            return Err(AppError::PermissionDenied(
                "You can only edit your own messages".into(),
            ));
        }

        let encrypted = self.encryption.encrypt_text(new_content)?;
        let mut messages = self.store.messages.write();
        let Some(message) = messages.get_mut(&message_id) else {
            return Ok(None);
        };
        message.content_encrypted = encrypted;
        message.updated_at = Utc::now();
        Ok(Some(message.clone()))
    }

    /// Tombstone a message. Allowed for the sender, or a room owner/admin.
    pub async fn delete_message(
        &self,
        message_id: Uuid,
        deleted_by: Uuid,
    ) -> Result<Option<Message>> {
        let Some(current) = self.store.message(message_id) else {
            return Ok(None);
        };
        if current.is_deleted {
            return Ok(None);
        }
        if current.sender_id != deleted_by {
            let member = self.store.member(current.room_id, deleted_by);
            if !member.map(|m| m.role.can_moderate()).unwrap_or(false) {
                return Err(AppError::PermissionDenied(
                    "You don't have permission to delete this message".into(),
                ));
            }
        }

        let mut messages = self.store.messages.write();
        let Some(message) = messages.get_mut(&message_id) else {
            return Ok(None);
        };
        message.is_deleted = true;
        message.deleted_at = Some(Utc::now());
        Ok(Some(message.clone()))
    }

    /// Unread count for a member: messages after their last-read timestamp
    /// from other senders.
    pub async fn unread_count(&self, room_id: Uuid, user_id: Uuid) -> usize {
        let last_read = self
            .store
            .member(room_id, user_id)
            .and_then(|m| m.last_read_at);
        let messages = self.store.messages.read();
        messages
            .values()
            .filter(|m| m.room_id == room_id && !m.is_deleted && m.sender_id != user_id)
            .filter(|m| last_read.map(|at| m.created_at > at).unwrap_or(true))
            .count()
    }

    /// Latest live message in a room, if any.
    pub async fn last_message(&self, room_id: Uuid) -> Option<Message> {
        let messages = self.store.messages.read();
        messages
            .values()
            .filter(|m| m.room_id == room_id && !m.is_deleted)
            .max_by_key(|m| m.created_at)
            .cloned()
    }
}

// ============================================================================
// Reactions
// ============================================================================

pub struct ReactionRepository {
    store: Arc<ChatStore>,
}

impl ReactionRepository {
    pub fn new(store: Arc<ChatStore>) -> Self {
        Self { store }
    }

    fn find(&self, message_id: Uuid, user_id: Uuid, reaction: &str) -> Option<Reaction> {
        self.store
            .reactions
            .read()
            .iter()
            .find(|r| {
                r.message_id == message_id
                    && r.user_id == user_id
                    && r.reaction == reaction
                    && !r.is_deleted
            })
            .cloned()
    }

    /// Idempotent: the existing triple is returned as-is.
    pub async fn add_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        reaction: &str,
    ) -> Result<Reaction> {
        if let Some(existing) = self.find(message_id, user_id, reaction) {
            return Ok(existing);
        }

        let message = self
            .store
            .message(message_id)
            .filter(|m| !m.is_deleted)
            .ok_or_else(|| AppError::not_found("ChatMessage", message_id))?;

        let member = self.store.member(message.room_id, user_id);
        if !member.map(|m| m.is_active).unwrap_or(false) {
            return Err(AppError::PermissionDenied(
                "You are not a member of this chat room".into(),
            ));
        }

        let row = Reaction {
            id: Uuid::new_v4(),
            message_id,
            user_id,
            reaction: reaction.to_string(),
            is_deleted: false,
            created_at: Utc::now(),
        };
        self.store.reactions.write().push(row.clone());
        Ok(row)
    }

    pub async fn remove_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        reaction: &str,
    ) -> Result<bool> {
        let mut reactions = self.store.reactions.write();
        if let Some(row) = reactions.iter_mut().find(|r| {
            r.message_id == message_id
                && r.user_id == user_id
                && r.reaction == reaction
                && !r.is_deleted
        }) {
            row.is_deleted = true;
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn get_reaction_counts(&self, message_id: Uuid) -> HashMap<String, usize> {
        let reactions = self.store.reactions.read();
        let mut counts = HashMap::new();
        for row in reactions
            .iter()
            .filter(|r| r.message_id == message_id && !r.is_deleted)
        {
            *counts.entry(row.reaction.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub async fn get_user_reactions(&self, message_id: Uuid, reaction: &str) -> Vec<Uuid> {
        self.store
            .reactions
            .read()
            .iter()
            .filter(|r| r.message_id == message_id && r.reaction == reaction && !r.is_deleted)
            .map(|r| r.user_id)
            .collect()
    }
}
