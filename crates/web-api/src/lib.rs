//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP 请求委托给应用层的用例服务，
//! WebSocket 连接交给实时投递子系统。

mod auth;
mod error;
pub mod metrics;
mod routes;
mod state;
mod websocket;
mod ws_connection;

pub use auth::{Claims, JwtService, TokenResponse};
pub use error::ApiError;
pub use routes::{cors_layer, router};
pub use state::AppState;
pub use ws_connection::WebSocketHandle;
