use async_trait::async_trait;
use domain::{
    ChatRoom, Message, MessageId, NewChatRoom, NewMessage, NewUser, RepositoryError, RoomId,
    RoomMember, Timestamp, User, UserEmail, UserId, Username,
};

use crate::pagination::{Page, PageRequest};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 用户名或邮箱重复时返回 `RepositoryError::Conflict`。
    async fn create(&self, user: NewUser) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_username(&self, username: &Username)
        -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError>;
    async fn list(&self, page: PageRequest) -> Result<Page<User>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatRoomRepository: Send + Sync {
    /// 创建房间并把创建者写成 owner，两步在同一个事务里完成。
    async fn create_with_owner(
        &self,
        room: NewChatRoom,
        owner: UserId,
        joined_at: Timestamp,
    ) -> Result<ChatRoom, RepositoryError>;
    async fn find_by_id(&self, id: RoomId) -> Result<Option<ChatRoom>, RepositoryError>;
    async fn list(
        &self,
        search: Option<String>,
        page: PageRequest,
    ) -> Result<Page<ChatRoom>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomMemberRepository: Send + Sync {
    /// 已存在的成员关系保持不变并原样返回。
    async fn add(&self, member: RoomMember) -> Result<RoomMember, RepositoryError>;
    async fn find(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<RoomMember>, RepositoryError>;
    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError>;
}

/// 消息检索条件，所有字段都是可选的；`text` 按子串匹配且不区分大小写。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub user_id: Option<UserId>,
    pub room_id: Option<RoomId>,
    pub text: Option<String>,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

impl MessageFilter {
    pub fn for_room(room_id: RoomId) -> Self {
        Self {
            room_id: Some(room_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        if self.user_id.is_some_and(|id| id != message.sender_id) {
            return false;
        }
        if self.room_id.is_some_and(|id| id != message.room_id) {
            return false;
        }
        if let Some(text) = &self.text {
            let haystack = message.content.as_str().to_lowercase();
            if !haystack.contains(&text.to_lowercase()) {
                return false;
            }
        }
        if self.start.is_some_and(|start| message.created_at < start) {
            return false;
        }
        if self.end.is_some_and(|end| message.created_at > end) {
            return false;
        }
        true
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 持久化消息，id 与创建时间由存储分配。
    async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError>;
    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;
    /// 按创建时间倒序返回。
    async fn search(
        &self,
        filter: &MessageFilter,
        page: PageRequest,
    ) -> Result<Page<Message>, RepositoryError>;
}
