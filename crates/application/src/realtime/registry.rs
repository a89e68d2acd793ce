//! 房间 → 用户 → 连接句柄的注册表
//!
//! 外层 map 只在查找或增删房间时短暂加锁，每个房间有自己的互斥锁，
//! 不同房间上的注册、注销和快照互不阻塞。
//!
//! 加锁顺序固定为 房间锁 → 外层 map 写锁 → live 集合，
//! 持有外层 map 锁时从不等待房间锁。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use domain::{RoomId, UserId};
use tokio::sync::{Mutex, RwLock};

use super::handle::{ConnectionId, SharedHandle};
use super::CONNECTIONS_ACTIVE;

#[derive(Default)]
struct RoomSlot {
    connections: BTreeMap<UserId, SharedHandle>,
    // 房间清空后被移出外层 map 时置位，拿着旧 Arc 的注册方需要重新取槽
    retired: bool,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    rooms: RwLock<HashMap<RoomId, Arc<Mutex<RoomSlot>>>>,
    live: Mutex<HashSet<ConnectionId>>,
    // 被新连接顶替、会话尚未结束的旧连接
    superseded: Mutex<HashSet<ConnectionId>>,
}

/// 会话结束时连接离开注册表的方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// 仍是当前注册的句柄，本次调用将其移除。
    Removed,
    /// 之前因投递失败被清理，且该用户当前没有其他连接。
    Pruned,
    /// 已有更新的连接占据了 (房间, 用户)。
    Superseded,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn existing_slot(&self, room_id: RoomId) -> Option<Arc<Mutex<RoomSlot>>> {
        self.rooms.read().await.get(&room_id).cloned()
    }

    async fn slot_for(&self, room_id: RoomId) -> Arc<Mutex<RoomSlot>> {
        if let Some(slot) = self.existing_slot(room_id).await {
            return slot;
        }
        self.rooms
            .write()
            .await
            .entry(room_id)
            .or_default()
            .clone()
    }

    /// 注册连接，返回被顶替的旧句柄（由调用方决定如何关闭）。
    pub async fn register(
        &self,
        room_id: RoomId,
        user_id: UserId,
        handle: SharedHandle,
    ) -> Option<SharedHandle> {
        loop {
            let slot = self.slot_for(room_id).await;
            let mut room = slot.lock().await;
            if room.retired {
                continue;
            }

            if room
                .connections
                .get(&user_id)
                .is_some_and(|current| current.id() == handle.id())
            {
                return None;
            }

            let connection_id = handle.id();
            let previous = room.connections.insert(user_id, handle);

            let mut live = self.live.lock().await;
            if let Some(previous) = &previous {
                live.remove(&previous.id());
                self.superseded.lock().await.insert(previous.id());
            } else {
                metrics::gauge!(CONNECTIONS_ACTIVE).increment(1.0);
            }
            live.insert(connection_id);

            return previous;
        }
    }

    /// 只有当前注册的句柄正是 `connection_id` 时才移除，
    /// 已被顶替或已被清理的连接注销时什么也不做。
    pub async fn unregister(
        &self,
        room_id: RoomId,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Option<SharedHandle> {
        let slot = self.existing_slot(room_id).await?;
        let mut room = slot.lock().await;

        let matches = room
            .connections
            .get(&user_id)
            .is_some_and(|current| current.id() == connection_id);
        if !matches {
            return None;
        }

        let removed = room.connections.remove(&user_id);

        if room.connections.is_empty() {
            room.retired = true;
            let mut rooms = self.rooms.write().await;
            if rooms
                .get(&room_id)
                .is_some_and(|current| Arc::ptr_eq(current, &slot))
            {
                rooms.remove(&room_id);
            }
        }

        self.live.lock().await.remove(&connection_id);
        metrics::gauge!(CONNECTIONS_ACTIVE).decrement(1.0);

        removed
    }

    /// 会话收尾时调用：注销自己的句柄，并说明连接是怎么离开的。
    /// 被顶替的标记在这里消费掉。
    pub async fn release(
        &self,
        room_id: RoomId,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Departure {
        if self
            .unregister(room_id, user_id, connection_id)
            .await
            .is_some()
        {
            return Departure::Removed;
        }
        if self.superseded.lock().await.remove(&connection_id) {
            return Departure::Superseded;
        }
        if self.room_users(room_id).await.contains(&user_id) {
            // 被清理后用户又重连了
            return Departure::Superseded;
        }
        Departure::Pruned
    }

    /// 房间当前连接的拷贝，按用户 id 排序。
    pub async fn snapshot(&self, room_id: RoomId) -> Vec<(UserId, SharedHandle)> {
        let Some(slot) = self.existing_slot(room_id).await else {
            return Vec::new();
        };
        let room = slot.lock().await;
        room.connections
            .iter()
            .map(|(user_id, handle)| (*user_id, Arc::clone(handle)))
            .collect()
    }

    pub async fn room_users(&self, room_id: RoomId) -> Vec<UserId> {
        let Some(slot) = self.existing_slot(room_id).await else {
            return Vec::new();
        };
        let room = slot.lock().await;
        room.connections.keys().copied().collect()
    }

    pub async fn total_connections(&self) -> usize {
        self.live.lock().await.len()
    }

    pub async fn room_counts(&self) -> HashMap<RoomId, usize> {
        let slots: Vec<(RoomId, Arc<Mutex<RoomSlot>>)> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(room_id, slot)| (*room_id, Arc::clone(slot)))
            .collect();

        let mut counts = HashMap::with_capacity(slots.len());
        for (room_id, slot) in slots {
            let room = slot.lock().await;
            if !room.retired && !room.connections.is_empty() {
                counts.insert(room_id, room.connections.len());
            }
        }
        counts
    }
}
