use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// 单个传输会话的唯一标识，注销时用它判断句柄是否仍是当前注册的那一个。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// WebSocket 关闭码（RFC 6455 §7.4.1）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    UnsupportedData,
    PolicyViolation,
    InternalError,
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::UnsupportedData => 1003,
            CloseCode::PolicyViolation => 1008,
            CloseCode::InternalError => 1011,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("send timed out")]
    TimedOut,
}

/// 已序列化的出站帧，广播时在多个连接间共享同一份文本。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame(Arc<str>);

impl OutboundFrame {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OutboundFrame {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

#[derive(Debug, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    fn id(&self) -> ConnectionId;

    async fn send(&self, frame: OutboundFrame) -> Result<(), DeliveryError>;

    /// 多次调用只有第一次生效。
    async fn close(&self, code: CloseCode, reason: &str);

    /// 在句柄被关闭（无论由哪一方）后返回。
    async fn closed(&self);
}

pub type SharedHandle = Arc<dyn ConnectionHandle>;
