//! 内存实现的关系型存储（用于测试和本地开发）

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use domain::{
    Attachment, Message, MessageCursor, MessageId, RepositoryError, Room, RoomId, RoomKind,
    RoomMembership, Timestamp, User, UserId, UserStatus,
};

use crate::repository::{MessageRepository, RoomRepository, UserRepository};

#[derive(Default)]
struct StoreState {
    users: HashMap<UserId, User>,
    rooms: HashMap<RoomId, Room>,
    memberships: HashMap<(RoomId, UserId), RoomMembership>,
    messages: HashMap<MessageId, Message>,
    attachments: Vec<Attachment>,
}

impl StoreState {
    fn direct_chat_between(&self, a: UserId, b: UserId) -> Option<RoomId> {
        self.memberships
            .keys()
            .filter(|(room_id, user_id)| room_id.kind() == RoomKind::Chat && *user_id == a)
            .map(|(room_id, _)| *room_id)
            .find(|room_id| self.memberships.contains_key(&(*room_id, b)))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    fail_message_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        self.state.lock().await.users.insert(user.id, user);
    }

    pub async fn insert_room(&self, room: Room, members: &[UserId]) {
        let mut state = self.state.lock().await;
        for user_id in members {
            state.memberships.insert(
                (room.id, *user_id),
                RoomMembership::new(room.id, *user_id, room.created_at),
            );
        }
        state.rooms.insert(room.id, room);
    }

    /// 直接写入消息，包括已软删除的
    pub async fn insert_message(&self, message: Message) {
        self.state.lock().await.messages.insert(message.id, message);
    }

    /// 让后续的消息写入失败，用于模拟持久化错误
    pub fn fail_message_writes(&self, fail: bool) {
        self.fail_message_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn rooms_of_kind(&self, kind: RoomKind) -> Vec<RoomId> {
        let state = self.state.lock().await;
        state
            .rooms
            .keys()
            .filter(|room_id| room_id.kind() == kind)
            .copied()
            .collect()
    }

    /// 包括已删除消息在内的原始行
    pub async fn raw_message(&self, id: MessageId) -> Option<Message> {
        self.state.lock().await.messages.get(&id).cloned()
    }

    pub async fn message_count(&self) -> usize {
        self.state.lock().await.messages.len()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(ids.iter().filter_map(|id| state.users.get(id).cloned()).collect())
    }

    async fn update_status(
        &self,
        id: UserId,
        status: UserStatus,
        last_active: Option<Timestamp>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let user = state.users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        match (status, last_active) {
            (UserStatus::Offline, Some(at)) => user.go_offline(at),
            (UserStatus::Offline, None) => user.status = UserStatus::Offline,
            (UserStatus::Online, _) => user.go_online(),
        }
        Ok(())
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<User>, RepositoryError> {
        let needle = query.to_lowercase();
        let state = self.state.lock().await;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|user| {
                user.name.to_lowercase().contains(&needle)
                    || user
                        .last_name
                        .as_deref()
                        .is_some_and(|last| last.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users.truncate(limit as usize);
        Ok(users)
    }
}

#[async_trait]
impl RoomRepository for MemoryStore {
    async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError> {
        Ok(self.state.lock().await.rooms.get(&id).cloned())
    }

    async fn create_with_members(
        &self,
        room: Room,
        members: &[UserId],
    ) -> Result<Room, RepositoryError> {
        let mut state = self.state.lock().await;
        if state.rooms.contains_key(&room.id) {
            return Err(RepositoryError::Conflict);
        }
        for user_id in members {
            state.memberships.insert(
                (room.id, *user_id),
                RoomMembership::new(room.id, *user_id, room.created_at),
            );
        }
        state.rooms.insert(room.id, room.clone());
        Ok(room)
    }

    async fn find_or_create_direct_chat(
        &self,
        a: UserId,
        b: UserId,
        at: Timestamp,
    ) -> Result<RoomId, RepositoryError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.direct_chat_between(a, b) {
            return Ok(existing);
        }
        let room = Room::direct_chat(RoomId::generate(RoomKind::Chat), at);
        let room_id = room.id;
        state.rooms.insert(room_id, room);
        for user_id in [a, b] {
            state
                .memberships
                .insert((room_id, user_id), RoomMembership::new(room_id, user_id, at));
        }
        Ok(room_id)
    }

    async fn find_direct_chat(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<RoomId>, RepositoryError> {
        Ok(self.state.lock().await.direct_chat_between(a, b))
    }

    async fn members_of(&self, room_id: RoomId) -> Result<Vec<UserId>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .memberships
            .keys()
            .filter(|(room, _)| *room == room_id)
            .map(|(_, user_id)| *user_id)
            .collect())
    }

    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError> {
        Ok(self
            .state
            .lock()
            .await
            .memberships
            .contains_key(&(room_id, user_id)))
    }

    async fn add_members(
        &self,
        room_id: RoomId,
        users: &[UserId],
        at: Timestamp,
    ) -> Result<Vec<UserId>, RepositoryError> {
        let mut state = self.state.lock().await;
        if !state.rooms.contains_key(&room_id) {
            return Err(RepositoryError::NotFound);
        }
        let mut added = Vec::new();
        for user_id in users {
            if !state.memberships.contains_key(&(room_id, *user_id)) {
                state
                    .memberships
                    .insert((room_id, *user_id), RoomMembership::new(room_id, *user_id, at));
                added.push(*user_id);
            }
        }
        Ok(added)
    }

    async fn remove_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .state
            .lock()
            .await
            .memberships
            .remove(&(room_id, user_id))
            .is_some())
    }

    async fn memberships_of(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<RoomMembership>, RepositoryError> {
        let state = self.state.lock().await;
        let mut memberships: Vec<RoomMembership> = state
            .memberships
            .values()
            .filter(|membership| membership.user_id == user_id)
            .cloned()
            .collect();
        memberships.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        memberships.truncate(limit as usize);
        Ok(memberships)
    }

    async fn direct_chat_partners(&self, user_id: UserId) -> Result<Vec<UserId>, RepositoryError> {
        let state = self.state.lock().await;
        let chats: Vec<RoomId> = state
            .memberships
            .keys()
            .filter(|(room_id, member)| room_id.kind() == RoomKind::Chat && *member == user_id)
            .map(|(room_id, _)| *room_id)
            .collect();
        let mut partners: Vec<UserId> = state
            .memberships
            .keys()
            .filter(|(room_id, member)| chats.contains(room_id) && *member != user_id)
            .map(|(_, member)| *member)
            .collect();
        partners.sort();
        partners.dedup();
        Ok(partners)
    }

    async fn touch_last_message(
        &self,
        room_id: RoomId,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        for membership in state
            .memberships
            .values_mut()
            .filter(|membership| membership.room_id == room_id)
        {
            membership.last_message_time = Some(at);
        }
        Ok(())
    }

    async fn search_public_channels(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Room>, RepositoryError> {
        let needle = query.to_lowercase();
        let state = self.state.lock().await;
        let mut rooms: Vec<Room> = state
            .rooms
            .values()
            .filter(|room| room.id.kind() == RoomKind::Channel && room.is_public)
            .filter(|room| {
                room.name
                    .as_deref()
                    .is_some_and(|name| name.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms.truncate(limit as usize);
        Ok(rooms)
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn create_with_attachments(
        &self,
        message: &Message,
        attachments: &[Attachment],
    ) -> Result<(), RepositoryError> {
        if self.fail_message_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage("message writes disabled"));
        }
        let mut state = self.state.lock().await;
        if state.messages.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }
        state.messages.insert(message.id, message.clone());
        state.attachments.extend_from_slice(attachments);
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .messages
            .get(&id)
            .filter(|message| !message.is_deleted())
            .cloned())
    }

    async fn update_text(&self, message: &Message) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let stored = state
            .messages
            .get_mut(&message.id)
            .filter(|stored| !stored.is_deleted())
            .ok_or(RepositoryError::NotFound)?;
        stored.text = message.text.clone();
        stored.is_edited = message.is_edited;
        stored.updated_at = message.updated_at;
        Ok(())
    }

    async fn soft_delete(&self, id: MessageId, at: Timestamp) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        match state.messages.get_mut(&id) {
            Some(message) if !message.is_deleted() => {
                message.soft_delete(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn page(
        &self,
        room_id: RoomId,
        before: Option<MessageCursor>,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let state = self.state.lock().await;
        let mut page: Vec<Message> = state
            .messages
            .values()
            .filter(|message| message.room_id == room_id && !message.is_deleted())
            .filter(|message| before.map_or(true, |cursor| cursor.precedes(&message.cursor())))
            .cloned()
            .collect();
        page.sort_by(|a, b| b.cursor().cmp(&a.cursor()));
        page.truncate(limit as usize);
        Ok(page)
    }

    async fn attachments_of(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<Attachment>, RepositoryError> {
        let state = self.state.lock().await;
        Ok(state
            .attachments
            .iter()
            .filter(|attachment| message_ids.contains(&attachment.message_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    #[tokio::test]
    async fn direct_chat_is_created_once_per_pair() {
        let store = Arc::new(MemoryStore::new());
        let (a, b) = (UserId::generate(), UserId::generate());
        let now = Utc::now();

        let (first, second) = tokio::join!(
            store.find_or_create_direct_chat(a, b, now),
            store.find_or_create_direct_chat(b, a, now),
        );
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(store.rooms_of_kind(RoomKind::Chat).await.len(), 1);
        assert_eq!(store.direct_chat_partners(a).await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn deleted_messages_are_invisible_to_reads() {
        let store = MemoryStore::new();
        let room = RoomId::generate(RoomKind::Group);
        let now = Utc::now();
        let message = Message::compose(MessageId::generate(), room, UserId::generate(), "x", None, now);
        store.create_with_attachments(&message, &[]).await.unwrap();

        assert!(store.soft_delete(message.id, now).await.unwrap());
        assert!(!store.soft_delete(message.id, now).await.unwrap());
        assert!(MessageRepository::find_by_id(&store, message.id).await.unwrap().is_none());
        assert!(store.page(room, None, 10).await.unwrap().is_empty());
        assert!(store.raw_message(message.id).await.unwrap().is_deleted());
    }

    #[tokio::test]
    async fn add_members_skips_existing() {
        let store = MemoryStore::new();
        let owner = UserId::generate();
        let guest = UserId::generate();
        let room = Room::owned(RoomId::generate(RoomKind::Group), "team", owner, None, Utc::now());
        let room_id = room.id;
        store.create_with_members(room, &[owner]).await.unwrap();

        let added = store.add_members(room_id, &[owner, guest], Utc::now()).await.unwrap();
        assert_eq!(added, vec![guest]);
        assert!(store.add_members(room_id, &[guest], Utc::now()).await.unwrap().is_empty());
    }
}
