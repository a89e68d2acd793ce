use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use domain::{Message, RoomId, Timestamp, User, UserId};
use futures_util::Stream;
use serde::Serialize;

use super::broadcast::Broadcaster;
use super::event::RealtimeEvent;
use super::gate::AuthGate;
use super::handle::{InboundFrame, SharedHandle, TransportError};
use super::registry::ConnectionRegistry;
use super::session::{Session, SessionOutcome};
use crate::clock::Clock;
use crate::repository::{
    ChatRoomRepository, MessageRepository, RoomMemberRepository, UserRepository,
};
use crate::token::TokenVerifier;

pub struct RealtimeServiceDependencies {
    pub token_verifier: Arc<dyn TokenVerifier>,
    pub user_repository: Arc<dyn UserRepository>,
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub member_repository: Arc<dyn RoomMemberRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub clock: Arc<dyn Clock>,
    pub send_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealtimeStats {
    pub total_connections: usize,
    pub rooms: BTreeMap<RoomId, usize>,
}

/// 实时连接入口：传输层每接受一个会话就调用一次 [`RealtimeService::serve`]。
pub struct RealtimeService {
    gate: AuthGate,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    messages: Arc<dyn MessageRepository>,
    clock: Arc<dyn Clock>,
}

impl RealtimeService {
    pub fn new(deps: RealtimeServiceDependencies) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry), deps.send_timeout);
        let gate = AuthGate::new(
            deps.token_verifier,
            deps.user_repository,
            deps.room_repository,
            deps.member_repository,
        );
        Self {
            gate,
            registry,
            broadcaster,
            messages: deps.message_repository,
            clock: deps.clock,
        }
    }

    /// 驱动一个连接直到结束，返回时连接已关闭且不再出现在注册表中。
    pub async fn serve<S>(
        &self,
        room_id: RoomId,
        credential: &str,
        handle: SharedHandle,
        inbound: S,
    ) -> SessionOutcome
    where
        S: Stream<Item = Result<InboundFrame, TransportError>> + Unpin + Send,
    {
        Session::new(self, handle)
            .run(room_id, credential, inbound)
            .await
    }

    /// 把通过 HTTP 写入的消息推送给房间内的在线连接。
    pub async fn publish_message(&self, message: &Message, sender: &User) -> BTreeSet<UserId> {
        self.broadcaster
            .announce(&RealtimeEvent::message(message, sender), message.room_id, None)
            .await
    }

    pub async fn stats(&self) -> RealtimeStats {
        let rooms = self.registry.room_counts().await.into_iter().collect();
        RealtimeStats {
            total_connections: self.registry.total_connections().await,
            rooms,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub(crate) fn gate(&self) -> &AuthGate {
        &self.gate
    }

    pub(crate) fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub(crate) fn messages(&self) -> &Arc<dyn MessageRepository> {
        &self.messages
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }
}
