//! 实时消息投递
//!
//! 一个连接从鉴权、注册、收发消息到清理的完整生命周期都在这里处理，
//! 传输层只需要提供 [`ConnectionHandle`] 和一个入站帧流。

pub mod broadcast;
pub mod event;
pub mod gate;
pub mod handle;
pub mod registry;
pub mod service;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use broadcast::Broadcaster;
pub use event::{parse_client_frame, FrameError, RealtimeEvent};
pub use gate::{Admission, AuthGate, Rejection};
pub use handle::{
    CloseCode, ConnectionHandle, ConnectionId, DeliveryError, InboundFrame, OutboundFrame,
    SharedHandle, TransportError,
};
pub use registry::{ConnectionRegistry, Departure};
pub use service::{RealtimeService, RealtimeServiceDependencies, RealtimeStats};
pub use session::{SessionOutcome, SessionState};

/// 当前已注册的实时连接数。
pub const CONNECTIONS_ACTIVE: &str = "websocket_connections_active";
/// 每个房间的广播次数，带 `chat_id` 标签。
pub const MESSAGES_TOTAL: &str = "websocket_messages_total";
