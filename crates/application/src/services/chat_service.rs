use std::sync::Arc;

use domain::{
    ChatRoom, DomainError, Message, MessageContent, MessageId, NewChatRoom, NewMessage, RoomId,
    RoomMember, RoomRole, UserId,
};

use crate::{
    clock::Clock,
    error::ApplicationError,
    pagination::{Page, PageRequest},
    repository::{
        ChatRoomRepository, MessageFilter, MessageRepository, RoomMemberRepository,
        UserRepository,
    },
};

#[derive(Debug, Clone)]
pub struct CreateRoomRequest {
    pub name: String,
    pub is_private: bool,
    pub creator_id: UserId,
}

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
}

pub struct ChatServiceDependencies {
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub member_repository: Arc<dyn RoomMemberRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub clock: Arc<dyn Clock>,
}

pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    async fn load_room(&self, room_id: RoomId) -> Result<ChatRoom, ApplicationError> {
        self.deps
            .room_repository
            .find_by_id(room_id)
            .await?
            .ok_or_else(|| DomainError::RoomNotFound.into())
    }

    // 私有房间只对成员开放，公开房间不做限制
    async fn ensure_can_access(
        &self,
        room: &ChatRoom,
        user_id: Option<UserId>,
    ) -> Result<(), ApplicationError> {
        if !room.is_private {
            return Ok(());
        }
        let Some(user_id) = user_id else {
            return Err(DomainError::UserNotInRoom.into());
        };
        if !self.deps.member_repository.is_member(room.id, user_id).await? {
            return Err(DomainError::UserNotInRoom.into());
        }
        Ok(())
    }

    pub async fn create_room(&self, request: CreateRoomRequest) -> Result<ChatRoom, ApplicationError> {
        let now = self.deps.clock.now();
        let new_room = NewChatRoom::new(request.name, request.is_private, now)?;

        let room = self
            .deps
            .room_repository
            .create_with_owner(new_room, request.creator_id, now)
            .await?;
        tracing::info!(chat_id = %room.id, owner_id = %request.creator_id, "chat created");
        Ok(room)
    }

    pub async fn get_room(&self, room_id: RoomId) -> Result<ChatRoom, ApplicationError> {
        self.load_room(room_id).await
    }

    pub async fn list_rooms(
        &self,
        search: Option<String>,
        page: PageRequest,
    ) -> Result<Page<ChatRoom>, ApplicationError> {
        let search = search
            .map(|term| term.trim().to_owned())
            .filter(|term| !term.is_empty());
        Ok(self.deps.room_repository.list(search, page).await?)
    }

    /// 加入公开房间；重复加入返回已有的成员记录。
    pub async fn join_room(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<RoomMember, ApplicationError> {
        let room = self.load_room(room_id).await?;
        if room.is_private {
            return Err(DomainError::RoomIsPrivate.into());
        }

        let member = RoomMember::new(room.id, user_id, RoomRole::Member, self.deps.clock.now());
        Ok(self.deps.member_repository.add(member).await?)
    }

    /// 由房主把用户拉进房间，私有房间只能通过这种方式加入。
    pub async fn add_member(
        &self,
        room_id: RoomId,
        operator_id: UserId,
        user_id: UserId,
    ) -> Result<RoomMember, ApplicationError> {
        let room = self.load_room(room_id).await?;

        let operator = self
            .deps
            .member_repository
            .find(room.id, operator_id)
            .await?
            .ok_or(DomainError::UserNotInRoom)?;
        if !operator.is_owner() {
            return Err(DomainError::OperationNotAllowed.into());
        }

        if self.deps.user_repository.find_by_id(user_id).await?.is_none() {
            return Err(DomainError::UserNotFound.into());
        }

        let member = RoomMember::new(room.id, user_id, RoomRole::Member, self.deps.clock.now());
        Ok(self.deps.member_repository.add(member).await?)
    }

    pub async fn send_message(&self, request: SendMessageRequest) -> Result<Message, ApplicationError> {
        let content = MessageContent::new(request.content)?;
        let room = self.load_room(request.room_id).await?;
        self.ensure_can_access(&room, Some(request.sender_id)).await?;

        let message = self
            .deps
            .message_repository
            .create(NewMessage::new(room.id, request.sender_id, content))
            .await?;
        Ok(message)
    }

    /// 房间历史消息，最新的在前。
    pub async fn room_messages(
        &self,
        room_id: RoomId,
        viewer: Option<UserId>,
        page: PageRequest,
    ) -> Result<Page<Message>, ApplicationError> {
        let room = self.load_room(room_id).await?;
        self.ensure_can_access(&room, viewer).await?;

        Ok(self
            .deps
            .message_repository
            .search(&MessageFilter::for_room(room.id), page)
            .await?)
    }

    pub async fn search_messages(
        &self,
        filter: MessageFilter,
        page: PageRequest,
    ) -> Result<Page<Message>, ApplicationError> {
        if let (Some(start), Some(end)) = (filter.start, filter.end) {
            if start > end {
                return Err(DomainError::invalid_argument(
                    "start_date",
                    "must not be after end_date",
                )
                .into());
            }
        }
        Ok(self.deps.message_repository.search(&filter, page).await?)
    }

    pub async fn get_message(&self, id: MessageId) -> Result<Message, ApplicationError> {
        self.deps
            .message_repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| DomainError::MessageNotFound.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{
        MockChatRoomRepository, MockMessageRepository, MockRoomMemberRepository,
        MockUserRepository,
    };
    use crate::SystemClock;
    use chrono::Utc;

    fn room(id: i64, is_private: bool) -> ChatRoom {
        ChatRoom {
            id: RoomId::new(id),
            name: "General".to_string(),
            is_private,
            created_at: Utc::now(),
        }
    }

    struct Mocks {
        rooms: MockChatRoomRepository,
        members: MockRoomMemberRepository,
        messages: MockMessageRepository,
        users: MockUserRepository,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                rooms: MockChatRoomRepository::new(),
                members: MockRoomMemberRepository::new(),
                messages: MockMessageRepository::new(),
                users: MockUserRepository::new(),
            }
        }

        fn with_room(mut self, is_private: bool) -> Self {
            self.rooms
                .expect_find_by_id()
                .returning(move |id| Ok(Some(room(id.value(), is_private))));
            self
        }

        fn build(self) -> ChatService {
            ChatService::new(ChatServiceDependencies {
                room_repository: Arc::new(self.rooms),
                member_repository: Arc::new(self.members),
                message_repository: Arc::new(self.messages),
                user_repository: Arc::new(self.users),
                clock: Arc::new(SystemClock),
            })
        }
    }

    #[tokio::test]
    async fn test_create_room_makes_creator_owner() {
        let mut mocks = Mocks::new();
        mocks
            .rooms
            .expect_create_with_owner()
            .times(1)
            .returning(|new_room, owner, _| {
                assert_eq!(owner, UserId::new(3));
                Ok(new_room.into_room(RoomId::new(10)))
            });

        let room = mocks
            .build()
            .create_room(CreateRoomRequest {
                name: " Lobby ".to_string(),
                is_private: false,
                creator_id: UserId::new(3),
            })
            .await
            .unwrap();
        assert_eq!(room.name, "Lobby");
    }

    #[tokio::test]
    async fn test_join_private_room_is_refused() {
        let mut mocks = Mocks::new().with_room(true);
        mocks.members.expect_add().never();

        let err = mocks
            .build()
            .join_room(RoomId::new(5), UserId::new(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::RoomIsPrivate)
        ));
    }

    #[tokio::test]
    async fn test_only_owner_adds_members() {
        let mut mocks = Mocks::new().with_room(true);
        mocks.members.expect_find().returning(|room_id, user_id| {
            Ok(Some(RoomMember::new(
                room_id,
                user_id,
                RoomRole::Member,
                Utc::now(),
            )))
        });
        mocks.members.expect_add().never();

        let err = mocks
            .build()
            .add_member(RoomId::new(5), UserId::new(2), UserId::new(3))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::OperationNotAllowed)
        ));
    }

    #[tokio::test]
    async fn test_send_message_to_private_room_requires_membership() {
        let mut mocks = Mocks::new().with_room(true);
        mocks.members.expect_is_member().returning(|_, _| Ok(false));
        mocks.messages.expect_create().never();

        let err = mocks
            .build()
            .send_message(SendMessageRequest {
                room_id: RoomId::new(5),
                sender_id: UserId::new(2),
                content: "hello".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::UserNotInRoom)
        ));
    }

    #[tokio::test]
    async fn test_send_blank_message_is_rejected() {
        let mut mocks = Mocks::new();
        mocks.rooms.expect_find_by_id().never();

        let err = mocks
            .build()
            .send_message(SendMessageRequest {
                room_id: RoomId::new(5),
                sender_id: UserId::new(2),
                content: "   ".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_room_messages_of_public_room_need_no_viewer() {
        let mut mocks = Mocks::new().with_room(false);
        mocks.members.expect_is_member().never();
        mocks
            .messages
            .expect_search()
            .times(1)
            .returning(|filter, page| {
                assert_eq!(filter.room_id, Some(RoomId::new(5)));
                Ok(Page::new(Vec::new(), page, 0))
            });

        let page = mocks
            .build()
            .room_messages(RoomId::new(5), None, PageRequest::default())
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_search_rejects_inverted_range() {
        let now = Utc::now();
        let filter = MessageFilter {
            start: Some(now),
            end: Some(now - chrono::Duration::hours(1)),
            ..MessageFilter::default()
        };

        let err = Mocks::new()
            .build()
            .search_messages(filter, PageRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApplicationError::Domain(DomainError::InvalidArgument { .. })
        ));
    }
}
