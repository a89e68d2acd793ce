use std::sync::Arc;

use domain::{ChatRoom, RoomId, User};
use thiserror::Error;
use tracing::{error, warn};

use super::handle::CloseCode;
use crate::repository::{ChatRoomRepository, RoomMemberRepository, UserRepository};
use crate::token::TokenVerifier;

#[derive(Debug, Clone)]
pub struct Admission {
    pub user: User,
    pub room: ChatRoom,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    #[error("invalid credential")]
    InvalidCredential,
    #[error("room not found")]
    RoomNotFound,
    #[error("not a member of this private room")]
    Forbidden,
    #[error("service unavailable")]
    Unavailable,
}

impl Rejection {
    pub fn close_code(self) -> CloseCode {
        match self {
            Rejection::InvalidCredential | Rejection::Forbidden => CloseCode::PolicyViolation,
            Rejection::RoomNotFound => CloseCode::UnsupportedData,
            Rejection::Unavailable => CloseCode::InternalError,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Rejection::InvalidCredential => "Invalid token",
            Rejection::RoomNotFound => "Chat not found",
            Rejection::Forbidden => "Access denied",
            Rejection::Unavailable => "Service unavailable",
        }
    }
}

/// 连接准入检查：凭据 → 用户 → 房间 → 私有房间成员资格。
///
/// 只做读取，不缓存任何结果。
pub struct AuthGate {
    tokens: Arc<dyn TokenVerifier>,
    users: Arc<dyn UserRepository>,
    rooms: Arc<dyn ChatRoomRepository>,
    members: Arc<dyn RoomMemberRepository>,
}

impl AuthGate {
    pub fn new(
        tokens: Arc<dyn TokenVerifier>,
        users: Arc<dyn UserRepository>,
        rooms: Arc<dyn ChatRoomRepository>,
        members: Arc<dyn RoomMemberRepository>,
    ) -> Self {
        Self {
            tokens,
            users,
            rooms,
            members,
        }
    }

    pub async fn admit(&self, credential: &str, room_id: RoomId) -> Result<Admission, Rejection> {
        let user_id = self.tokens.verify(credential).map_err(|err| {
            warn!(chat_id = %room_id, error = %err, "websocket_auth_failed");
            Rejection::InvalidCredential
        })?;

        let user = match self.users.find_by_id(user_id).await {
            Ok(Some(user)) if user.is_active => user,
            Ok(_) => {
                warn!(chat_id = %room_id, user_id = %user_id, "websocket_auth_failed");
                return Err(Rejection::InvalidCredential);
            }
            Err(err) => {
                error!(chat_id = %room_id, user_id = %user_id, error = %err, "user lookup failed");
                return Err(Rejection::Unavailable);
            }
        };

        let room = match self.rooms.find_by_id(room_id).await {
            Ok(Some(room)) => room,
            Ok(None) => {
                warn!(chat_id = %room_id, user_id = %user.id, "websocket_chat_not_found");
                return Err(Rejection::RoomNotFound);
            }
            Err(err) => {
                error!(chat_id = %room_id, error = %err, "chat lookup failed");
                return Err(Rejection::Unavailable);
            }
        };

        if room.is_private {
            match self.members.is_member(room.id, user.id).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(chat_id = %room.id, user_id = %user.id, "websocket_access_denied");
                    return Err(Rejection::Forbidden);
                }
                Err(err) => {
                    error!(chat_id = %room.id, user_id = %user.id, error = %err, "membership lookup failed");
                    return Err(Rejection::Unavailable);
                }
            }
        }

        Ok(Admission { user, room })
    }
}
