//! 进程内存储
//!
//! 未配置数据库时使用，也用于测试。四个仓储共享同一把锁，
//! id 从 1 开始单调递增。

use std::collections::BTreeMap;

use application::{
    ChatRoomRepository, MessageFilter, MessageRepository, Page, PageRequest, RoomMemberRepository,
    UserRepository,
};
use async_trait::async_trait;
use chrono::Utc;
use domain::{
    ChatRoom, Message, MessageId, NewChatRoom, NewMessage, NewUser, RepositoryError, RoomId,
    RoomMember, RoomRole, Timestamp, User, UserEmail, UserId, Username,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    rooms: BTreeMap<RoomId, ChatRoom>,
    members: BTreeMap<(RoomId, UserId), RoomMember>,
    messages: BTreeMap<MessageId, Message>,
    next_user: i64,
    next_room: i64,
    next_message: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

#[derive(Default)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for InMemoryStorage {
    async fn create(&self, user: NewUser) -> Result<User, RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(RepositoryError::conflict("username"));
        }
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(RepositoryError::conflict("email"));
        }

        let id = UserId::new(next_id(&mut tables.next_user));
        let user = user.into_user(id);
        tables.users.insert(id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_username(
        &self,
        username: &Username,
    ) -> Result<Option<User>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| &u.username == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| &u.email == email).cloned())
    }

    async fn list(&self, page: PageRequest) -> Result<Page<User>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(Page::slice(tables.users.values().cloned().collect(), page))
    }
}

#[async_trait]
impl ChatRoomRepository for InMemoryStorage {
    async fn create_with_owner(
        &self,
        room: NewChatRoom,
        owner: UserId,
        joined_at: Timestamp,
    ) -> Result<ChatRoom, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&owner) {
            return Err(RepositoryError::NotFound);
        }

        let id = RoomId::new(next_id(&mut tables.next_room));
        let room = room.into_room(id);
        tables.rooms.insert(id, room.clone());
        tables.members.insert(
            (id, owner),
            RoomMember::new(id, owner, RoomRole::Owner, joined_at),
        );
        Ok(room)
    }

    async fn find_by_id(&self, id: RoomId) -> Result<Option<ChatRoom>, RepositoryError> {
        Ok(self.tables.read().await.rooms.get(&id).cloned())
    }

    async fn list(
        &self,
        search: Option<String>,
        page: PageRequest,
    ) -> Result<Page<ChatRoom>, RepositoryError> {
        let tables = self.tables.read().await;
        let rooms = tables
            .rooms
            .values()
            .filter(|room| search.as_deref().is_none_or(|term| room.name_matches(term)))
            .cloned()
            .collect();
        Ok(Page::slice(rooms, page))
    }
}

#[async_trait]
impl RoomMemberRepository for InMemoryStorage {
    async fn add(&self, member: RoomMember) -> Result<RoomMember, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.rooms.contains_key(&member.room_id) || !tables.users.contains_key(&member.user_id)
        {
            return Err(RepositoryError::NotFound);
        }
        let stored = tables
            .members
            .entry((member.room_id, member.user_id))
            .or_insert(member);
        Ok(stored.clone())
    }

    async fn find(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<RoomMember>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .members
            .get(&(room_id, user_id))
            .cloned())
    }

    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .members
            .contains_key(&(room_id, user_id)))
    }
}

#[async_trait]
impl MessageRepository for InMemoryStorage {
    async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.rooms.contains_key(&message.room_id) {
            return Err(RepositoryError::NotFound);
        }
        let id = MessageId::new(next_id(&mut tables.next_message));
        let message = message.into_message(id, Utc::now());
        tables.messages.insert(id, message.clone());
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self.tables.read().await.messages.get(&id).cloned())
    }

    async fn search(
        &self,
        filter: &MessageFilter,
        page: PageRequest,
    ) -> Result<Page<Message>, RepositoryError> {
        let tables = self.tables.read().await;
        let mut matching: Vec<Message> = tables
            .messages
            .values()
            .filter(|message| filter.matches(message))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(Page::slice(matching, page))
    }
}
