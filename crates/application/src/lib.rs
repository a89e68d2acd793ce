//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务（注册登录、房间、消息），
//! 以及实时投递子系统；存储、密码哈希和令牌校验都以 trait 的形式注入。

pub mod clock;
pub mod error;
pub mod pagination;
pub mod password;
pub mod realtime;
pub mod repository;
pub mod services;
pub mod token;

pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use pagination::{Page, PageMeta, PageRequest};
pub use password::{PasswordHasher, PasswordHasherError};
pub use realtime::{RealtimeService, RealtimeServiceDependencies, RealtimeStats};
pub use repository::{
    ChatRoomRepository, MessageFilter, MessageRepository, RoomMemberRepository, UserRepository,
};
pub use services::{
    AuthenticateUserRequest, ChatService, ChatServiceDependencies, CreateRoomRequest,
    RegisterUserRequest, SendMessageRequest, UserService, UserServiceDependencies,
};
pub use token::{TokenError, TokenVerifier};
