//! WebSocket 入口
//!
//! 升级完成后把 socket 拆成读写两半：写半交给 [`WebSocketHandle`]，
//! 读半转换成入站帧流，整个会话由 `RealtimeService::serve` 驱动。

use application::realtime::{InboundFrame, SessionOutcome, SharedHandle, TransportError};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use domain::RoomId;
use futures_util::{future, StreamExt};
use serde::Deserialize;

use crate::{state::AppState, ws_connection::WebSocketHandle};

#[derive(Debug, Deserialize)]
pub struct WebSocketQuery {
    /// 缺省时按无效凭据处理，升级后以 1008 关闭
    #[serde(default)]
    pub token: Option<String>,
}

pub(crate) async fn chat_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Query(query): Query<WebSocketQuery>,
) -> Response {
    let credential = query.token.unwrap_or_default();
    ws.on_upgrade(move |socket| serve_socket(state, RoomId::new(chat_id), credential, socket))
}

async fn serve_socket(state: AppState, room_id: RoomId, credential: String, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let handle: SharedHandle = WebSocketHandle::spawn(sink, state.outbound_buffer);

    let inbound = stream
        .filter_map(|item| {
            future::ready(match item {
                Ok(message) => inbound_frame(message).map(Ok),
                Err(err) => Some(Err(TransportError(err.to_string()))),
            })
        })
        .boxed();

    let outcome = state
        .realtime
        .serve(room_id, &credential, handle, inbound)
        .await;
    if let SessionOutcome::Rejected(rejection) = outcome {
        tracing::debug!(chat_id = %room_id, ?rejection, "websocket session rejected");
    }
}

/// Ping/Pong 由底层协议栈自动应答，不进入会话。
fn inbound_frame(message: WsMessage) -> Option<InboundFrame> {
    match message {
        WsMessage::Text(text) => Some(InboundFrame::Text(text.as_str().to_owned())),
        WsMessage::Binary(bytes) => Some(InboundFrame::Binary(bytes.to_vec())),
        WsMessage::Close(_) => Some(InboundFrame::Close),
        WsMessage::Ping(_) | WsMessage::Pong(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_frames_are_filtered() {
        assert_eq!(
            inbound_frame(WsMessage::Text(String::from("hi").into())),
            Some(InboundFrame::Text("hi".into()))
        );
        assert_eq!(
            inbound_frame(WsMessage::Binary(vec![1u8, 2].into())),
            Some(InboundFrame::Binary(vec![1, 2]))
        );
        assert_eq!(inbound_frame(WsMessage::Close(None)), Some(InboundFrame::Close));
        assert_eq!(inbound_frame(WsMessage::Ping(Vec::new().into())), None);
        assert_eq!(inbound_frame(WsMessage::Pong(Vec::new().into())), None);
    }
}
