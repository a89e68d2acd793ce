//! 聊天系统核心领域模型
//!
//! 包含用户、聊天室、成员关系和消息等实体，以及相关的值对象和错误类型。
//! 领域层不依赖任何存储或传输实现。

pub mod chat_room;
pub mod errors;
pub mod message;
pub mod room_member;
pub mod user;
pub mod value_objects;

pub use chat_room::{ChatRoom, NewChatRoom};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::{Message, NewMessage};
pub use room_member::{RoomMember, RoomRole};
pub use user::{NewUser, User};
pub use value_objects::{
    MessageContent, MessageId, PasswordHash, RoomId, Timestamp, UserEmail, UserId, Username,
};
