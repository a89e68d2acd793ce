use crate::value_objects::{MessageContent, MessageId, RoomId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub created_at: Timestamp,
}

/// 待写入消息存储的消息，id 和时间戳由存储分配后返回。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: MessageContent,
}

impl NewMessage {
    pub fn new(room_id: RoomId, sender_id: UserId, content: MessageContent) -> Self {
        Self {
            room_id,
            sender_id,
            content,
        }
    }

    pub fn into_message(self, id: MessageId, created_at: Timestamp) -> Message {
        Message {
            id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            content: self.content,
            created_at,
        }
    }
}
