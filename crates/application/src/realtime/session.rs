//! 单个实时连接的状态机
//!
//! `Connecting → Authenticating → Authorized → Active → Closing → Closed`，
//! 准入被拒时从 `Authenticating` 直接进入 `Closed`。

use domain::{ChatRoom, NewMessage, RoomId, Timestamp, User};
use futures_util::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use super::event::{parse_client_frame, FrameError, RealtimeEvent, PROCESSING_ERROR};
use super::gate::{Admission, Rejection};
use super::handle::{CloseCode, InboundFrame, SharedHandle, TransportError};
use super::registry::Departure;
use super::service::RealtimeService;

pub(crate) const SUPERSEDED_REASON: &str = "superseded by a newer connection";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticating,
    Authorized,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// 准入失败，连接已按拒绝原因关闭。
    Rejected(Rejection),
    /// 会话正常结束；`announced_leave` 表示是否向房间广播了 `user_left`。
    Finished { announced_leave: bool },
}

enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Session<'a> {
    service: &'a RealtimeService,
    handle: SharedHandle,
    state: SessionState,
    connected_at: Option<Timestamp>,
    announced_join: bool,
}

impl<'a> Session<'a> {
    pub(crate) fn new(service: &'a RealtimeService, handle: SharedHandle) -> Self {
        Self {
            service,
            handle,
            state: SessionState::Connecting,
            connected_at: None,
            announced_join: false,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(connection_id = %self.handle.id(), from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    pub(crate) async fn run<S>(
        mut self,
        room_id: RoomId,
        credential: &str,
        mut inbound: S,
    ) -> SessionOutcome
    where
        S: Stream<Item = Result<InboundFrame, TransportError>> + Unpin + Send,
    {
        self.transition(SessionState::Authenticating);
        let Admission { user, room } = match self.service.gate().admit(credential, room_id).await {
            Ok(admission) => admission,
            Err(rejection) => {
                self.handle
                    .close(rejection.close_code(), rejection.reason())
                    .await;
                self.transition(SessionState::Closed);
                return SessionOutcome::Rejected(rejection);
            }
        };

        self.transition(SessionState::Authorized);
        if self.authorize(&user, &room).await {
            self.transition(SessionState::Active);
            self.receive_loop(&user, &room, &mut inbound).await;
        }

        self.transition(SessionState::Closing);
        let announced_leave = self.close_out(&user, &room).await;
        self.transition(SessionState::Closed);

        SessionOutcome::Finished { announced_leave }
    }

    /// 注册并打招呼；欢迎消息发送失败时返回 false，连接已被清理。
    async fn authorize(&mut self, user: &User, room: &ChatRoom) -> bool {
        let now = self.service.now();
        self.connected_at = Some(now);

        let registry = self.service.registry();
        if let Some(previous) = registry.register(room.id, user.id, self.handle.clone()).await {
            info!(
                chat_id = %room.id,
                user_id = %user.id,
                connection_id = %previous.id(),
                "closing superseded connection"
            );
            previous.close(CloseCode::Normal, SUPERSEDED_REASON).await;
        }

        info!(
            chat_id = %room.id,
            user_id = %user.id,
            connection_id = %self.handle.id(),
            "websocket_connected"
        );

        let broadcaster = self.service.broadcaster();
        if !broadcaster
            .unicast(&RealtimeEvent::connected(room, now), room.id, user.id, &self.handle)
            .await
        {
            return false;
        }

        broadcaster
            .announce(&RealtimeEvent::user_joined(user, now), room.id, Some(user.id))
            .await;
        self.announced_join = true;
        true
    }

    async fn receive_loop<S>(&mut self, user: &User, room: &ChatRoom, inbound: &mut S)
    where
        S: Stream<Item = Result<InboundFrame, TransportError>> + Unpin + Send,
    {
        loop {
            let frame = tokio::select! {
                frame = inbound.next() => frame,
                _ = self.handle.closed() => {
                    debug!(chat_id = %room.id, user_id = %user.id, "handle closed by server");
                    return;
                }
            };

            let flow = match frame {
                Some(Ok(InboundFrame::Text(text))) => self.handle_text(user, room, &text).await,
                Some(Ok(InboundFrame::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => self.handle_text(user, room, &text).await,
                    Err(_) => {
                        self.reply_error(user, room, FrameError::InvalidJson.to_string())
                            .await
                    }
                },
                Some(Ok(InboundFrame::Close)) | None => Flow::Stop,
                Some(Err(err)) => {
                    warn!(chat_id = %room.id, user_id = %user.id, error = %err, "websocket_error");
                    Flow::Stop
                }
            };

            if let Flow::Stop = flow {
                return;
            }
        }
    }

    async fn handle_text(&self, user: &User, room: &ChatRoom, text: &str) -> Flow {
        let content = match parse_client_frame(text) {
            Ok(content) => content,
            Err(err) => return self.reply_error(user, room, err.to_string()).await,
        };

        let message = match self
            .service
            .messages()
            .create(NewMessage::new(room.id, user.id, content))
            .await
        {
            Ok(message) => message,
            Err(err) => {
                error!(chat_id = %room.id, user_id = %user.id, error = %err, "failed to persist message");
                return self.reply_error(user, room, PROCESSING_ERROR).await;
            }
        };

        info!(
            chat_id = %room.id,
            user_id = %user.id,
            message_id = %message.id,
            "websocket_message"
        );

        let pruned = self
            .service
            .broadcaster()
            .announce(&RealtimeEvent::message(&message, user), room.id, None)
            .await;
        if pruned.contains(&user.id) {
            Flow::Stop
        } else {
            Flow::Continue
        }
    }

    async fn reply_error(&self, user: &User, room: &ChatRoom, message: impl Into<String>) -> Flow {
        let delivered = self
            .service
            .broadcaster()
            .unicast(&RealtimeEvent::error(message), room.id, user.id, &self.handle)
            .await;
        if delivered {
            Flow::Continue
        } else {
            Flow::Stop
        }
    }

    /// 注销并关闭连接。被顶替的连接不广播 `user_left`，
    /// 投递失败被清理的连接只要宣布过加入就要宣布离开。
    async fn close_out(&self, user: &User, room: &ChatRoom) -> bool {
        let departure = self
            .service
            .registry()
            .release(room.id, user.id, self.handle.id())
            .await;
        let announce = match departure {
            Departure::Removed => true,
            Departure::Pruned => self.announced_join,
            Departure::Superseded => false,
        };

        if announce {
            self.service
                .broadcaster()
                .announce(
                    &RealtimeEvent::user_left(user, self.service.now()),
                    room.id,
                    None,
                )
                .await;
        }

        self.handle.close(CloseCode::Normal, "").await;

        let duration_ms = self
            .connected_at
            .map(|at| (self.service.now() - at).num_milliseconds())
            .unwrap_or_default();
        info!(
            chat_id = %room.id,
            user_id = %user.id,
            connection_id = %self.handle.id(),
            ?departure,
            duration_ms,
            "websocket_disconnected"
        );

        announce
    }
}
