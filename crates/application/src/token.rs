//! 访问令牌校验抽象
//!
//! 实时连接和 HTTP 接口都只依赖这个 trait，具体的 JWT 实现在 web-api 层。

use domain::UserId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
}

impl TokenError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }
}

/// 将不透明的 bearer 凭据解析为用户 id。
#[cfg_attr(test, mockall::automock)]
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Result<UserId, TokenError>;
}
