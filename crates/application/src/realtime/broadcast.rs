use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use domain::{RoomId, UserId};
use futures_util::future::join_all;
use tracing::{debug, error};

use super::event::RealtimeEvent;
use super::handle::{CloseCode, DeliveryError, OutboundFrame, SharedHandle};
use super::registry::ConnectionRegistry;
use super::MESSAGES_TOTAL;

const DELIVERY_FAILED: &str = "delivery failed";

/// 把事件投递给房间内已注册的连接，投递失败的连接会被移出注册表。
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    /// 并发发送给房间内除 `exclude` 以外的所有连接，返回本轮被清理的用户。
    pub async fn announce(
        &self,
        event: &RealtimeEvent,
        room_id: RoomId,
        exclude: Option<UserId>,
    ) -> BTreeSet<UserId> {
        let snapshot = self.registry.snapshot(room_id).await;
        if snapshot.is_empty() {
            return BTreeSet::new();
        }

        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                error!(chat_id = %room_id, kind = event.kind(), error = %err, "failed to encode event");
                return BTreeSet::new();
            }
        };

        metrics::counter!(MESSAGES_TOTAL, "chat_id" => room_id.to_string()).increment(1);

        let sends = snapshot
            .into_iter()
            .filter(|(user_id, _)| Some(*user_id) != exclude)
            .map(|(user_id, handle)| {
                let frame = frame.clone();
                async move {
                    let result = self.deliver(&handle, frame).await;
                    (user_id, handle, result)
                }
            });
        let results = join_all(sends).await;

        let mut pruned = BTreeSet::new();
        for (user_id, handle, result) in results {
            if let Err(err) = result {
                debug!(chat_id = %room_id, user_id = %user_id, error = %err, "broadcast delivery failed");
                if self.prune(room_id, user_id, &handle).await {
                    pruned.insert(user_id);
                }
            }
        }
        pruned
    }

    /// 只发给一个连接，失败时立即清理该连接。
    pub async fn unicast(
        &self,
        event: &RealtimeEvent,
        room_id: RoomId,
        user_id: UserId,
        handle: &SharedHandle,
    ) -> bool {
        let frame = match event.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                error!(chat_id = %room_id, kind = event.kind(), error = %err, "failed to encode event");
                return false;
            }
        };

        match self.deliver(handle, frame).await {
            Ok(()) => true,
            Err(err) => {
                debug!(chat_id = %room_id, user_id = %user_id, error = %err, "unicast delivery failed");
                self.prune(room_id, user_id, handle).await;
                false
            }
        }
    }

    async fn deliver(&self, handle: &SharedHandle, frame: OutboundFrame) -> Result<(), DeliveryError> {
        tokio::time::timeout(self.send_timeout, handle.send(frame))
            .await
            .unwrap_or(Err(DeliveryError::TimedOut))
    }

    async fn prune(&self, room_id: RoomId, user_id: UserId, handle: &SharedHandle) -> bool {
        let removed = self
            .registry
            .unregister(room_id, user_id, handle.id())
            .await
            .is_some();
        handle.close(CloseCode::InternalError, DELIVERY_FAILED).await;
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::handle::ConnectionHandle;
    use crate::realtime::testing::RecordingHandle;

    const ROOM: RoomId = RoomId(5);

    fn broadcaster(registry: &Arc<ConnectionRegistry>) -> Broadcaster {
        Broadcaster::new(Arc::clone(registry), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_announce_to_empty_room_is_noop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let pruned = broadcaster(&registry)
            .announce(&RealtimeEvent::error("x"), ROOM, None)
            .await;
        assert!(pruned.is_empty());
    }

    #[tokio::test]
    async fn test_announce_skips_excluded_user() {
        let registry = Arc::new(ConnectionRegistry::new());
        let alice = RecordingHandle::new();
        let bob = RecordingHandle::new();
        registry.register(ROOM, UserId::new(1), alice.clone()).await;
        registry.register(ROOM, UserId::new(2), bob.clone()).await;

        broadcaster(&registry)
            .announce(&RealtimeEvent::error("hello"), ROOM, Some(UserId::new(2)))
            .await;

        assert_eq!(alice.events().len(), 1);
        assert!(bob.events().is_empty());
    }

    #[tokio::test]
    async fn test_failed_handle_is_pruned_and_others_still_receive() {
        let registry = Arc::new(ConnectionRegistry::new());
        let alice = RecordingHandle::new();
        let broken = RecordingHandle::new();
        let carol = RecordingHandle::new();
        registry.register(ROOM, UserId::new(1), alice.clone()).await;
        registry.register(ROOM, UserId::new(2), broken.clone()).await;
        registry.register(ROOM, UserId::new(3), carol.clone()).await;
        broken.fail_sends();

        let pruned = broadcaster(&registry)
            .announce(&RealtimeEvent::error("hello"), ROOM, None)
            .await;

        assert_eq!(pruned, BTreeSet::from([UserId::new(2)]));
        assert_eq!(alice.events().len(), 1);
        assert_eq!(carol.events().len(), 1);
        assert_eq!(
            registry.room_users(ROOM).await,
            vec![UserId::new(1), UserId::new(3)]
        );
        assert_eq!(
            broken.close_frame().map(|(code, _)| code),
            Some(CloseCode::InternalError)
        );
    }

    #[tokio::test]
    async fn test_stalled_handle_times_out_without_blocking_room() {
        let registry = Arc::new(ConnectionRegistry::new());
        let alice = RecordingHandle::new();
        let slow = RecordingHandle::new();
        registry.register(ROOM, UserId::new(1), alice.clone()).await;
        registry.register(ROOM, UserId::new(2), slow.clone()).await;
        slow.stall_sends();

        let pruned = broadcaster(&registry)
            .announce(&RealtimeEvent::error("hello"), ROOM, None)
            .await;

        assert_eq!(pruned, BTreeSet::from([UserId::new(2)]));
        assert_eq!(alice.events().len(), 1);
        assert_eq!(registry.total_connections().await, 1);
    }

    #[tokio::test]
    async fn test_pruning_superseded_handle_is_noop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let old = RecordingHandle::new();
        let new = RecordingHandle::new();
        registry.register(ROOM, UserId::new(1), old.clone()).await;
        registry.register(ROOM, UserId::new(1), new.clone()).await;
        old.fail_sends();

        let old_shared: SharedHandle = old.clone();
        let delivered = broadcaster(&registry)
            .unicast(&RealtimeEvent::error("x"), ROOM, UserId::new(1), &old_shared)
            .await;

        assert!(!delivered);
        assert_eq!(registry.total_connections().await, 1);
        assert_eq!(registry.snapshot(ROOM).await[0].1.id(), new.id());
    }

    #[tokio::test]
    async fn test_unicast_failure_prunes_handle() {
        let registry = Arc::new(ConnectionRegistry::new());
        let alice = RecordingHandle::new();
        registry.register(ROOM, UserId::new(1), alice.clone()).await;
        alice.fail_sends();

        let shared: SharedHandle = alice.clone();
        let delivered = broadcaster(&registry)
            .unicast(&RealtimeEvent::error("x"), ROOM, UserId::new(1), &shared)
            .await;

        assert!(!delivered);
        assert!(registry.room_users(ROOM).await.is_empty());
        assert!(alice.is_closed());
    }
}
