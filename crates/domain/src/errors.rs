//! 领域模型错误定义
//!
//! 定义了业务规则校验和仓储访问可能产生的错误类型。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("user already exists")]
    UserAlreadyExists,

    #[error("user not found")]
    UserNotFound,

    #[error("room not found")]
    RoomNotFound,

    #[error("message not found")]
    MessageNotFound,

    /// 用户不是私有房间的成员
    #[error("user is not a member of the room")]
    UserNotInRoom,

    #[error("room is private")]
    RoomIsPrivate,

    #[error("operation not allowed")]
    OperationNotAllowed,
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 仓储访问错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    /// 唯一约束冲突
    #[error("record conflicts with an existing one: {0}")]
    Conflict(String),

    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }
}
