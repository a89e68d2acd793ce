use domain::{ChatRoom, Message, MessageContent, MessageId, RoomId, Timestamp, User, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::handle::OutboundFrame;

pub const PROCESSING_ERROR: &str = "Error processing message";

/// 服务端推送给客户端的事件，按 `type` 字段区分。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    System {
        message: String,
        timestamp: Timestamp,
        chat_id: RoomId,
    },
    UserJoined {
        user_id: UserId,
        username: String,
        timestamp: Timestamp,
    },
    UserLeft {
        user_id: UserId,
        username: String,
        timestamp: Timestamp,
    },
    Message {
        message_id: MessageId,
        content: String,
        user_id: UserId,
        username: String,
        chat_id: RoomId,
        timestamp: Timestamp,
    },
    Error {
        message: String,
    },
}

impl RealtimeEvent {
    pub fn connected(room: &ChatRoom, at: Timestamp) -> Self {
        Self::System {
            message: format!("Connected to chat: {}", room.name),
            timestamp: at,
            chat_id: room.id,
        }
    }

    pub fn user_joined(user: &User, at: Timestamp) -> Self {
        Self::UserJoined {
            user_id: user.id,
            username: user.username.to_string(),
            timestamp: at,
        }
    }

    pub fn user_left(user: &User, at: Timestamp) -> Self {
        Self::UserLeft {
            user_id: user.id,
            username: user.username.to_string(),
            timestamp: at,
        }
    }

    /// 消息事件使用存储分配的 id 和时间戳。
    pub fn message(message: &Message, sender: &User) -> Self {
        Self::Message {
            message_id: message.id,
            content: message.content.as_str().to_owned(),
            user_id: message.sender_id,
            username: sender.username.to_string(),
            chat_id: message.room_id,
            timestamp: message.created_at,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::UserJoined { .. } => "user_joined",
            Self::UserLeft { .. } => "user_left",
            Self::Message { .. } => "message",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_frame(&self) -> Result<OutboundFrame, serde_json::Error> {
        serde_json::to_string(self).map(OutboundFrame::from)
    }
}

/// 客户端帧的协议错误，`Display` 即回给发送者的提示文本。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid JSON format")]
    InvalidJson,
    #[error("Invalid message format. 'content' is required.")]
    MissingContent,
}

/// 解析 `{"content": "..."}`。内容缺失、不是字符串或全为空白都视为格式错误。
pub fn parse_client_frame(text: &str) -> Result<MessageContent, FrameError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| FrameError::InvalidJson)?;

    let content = value
        .get("content")
        .and_then(serde_json::Value::as_str)
        .ok_or(FrameError::MissingContent)?;

    MessageContent::new(content).map_err(|_| FrameError::MissingContent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use domain::{PasswordHash, UserEmail, Username};
    use serde_json::json;

    fn alice() -> User {
        User {
            id: UserId::new(1),
            username: Username::parse("alice").unwrap(),
            display_name: None,
            email: UserEmail::parse("alice@example.com").unwrap(),
            password: PasswordHash::new("x").unwrap(),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_system_event_wire_shape() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let room = ChatRoom {
            id: RoomId::new(5),
            name: "General".to_string(),
            is_private: false,
            created_at: at,
        };

        let value = serde_json::to_value(RealtimeEvent::connected(&room, at)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "system",
                "message": "Connected to chat: General",
                "timestamp": "2024-01-02T03:04:05Z",
                "chat_id": 5
            })
        );
    }

    #[test]
    fn test_message_event_carries_stored_fields() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let message = Message {
            id: MessageId::new(42),
            room_id: RoomId::new(5),
            sender_id: UserId::new(1),
            content: MessageContent::new("hi").unwrap(),
            created_at: at,
        };

        let value = serde_json::to_value(RealtimeEvent::message(&message, &alice())).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["message_id"], 42);
        assert_eq!(value["content"], "hi");
        assert_eq!(value["user_id"], 1);
        assert_eq!(value["username"], "alice");
        assert_eq!(value["chat_id"], 5);
    }

    #[test]
    fn test_user_left_and_error_shapes() {
        let value = serde_json::to_value(RealtimeEvent::user_left(&alice(), Utc::now())).unwrap();
        assert_eq!(value["type"], "user_left");
        assert_eq!(value["user_id"], 1);

        let value = serde_json::to_value(RealtimeEvent::error(PROCESSING_ERROR)).unwrap();
        assert_eq!(
            value,
            json!({"type": "error", "message": "Error processing message"})
        );
    }

    #[test]
    fn test_parse_client_frame() {
        assert_eq!(
            parse_client_frame(r#"{"content":"hello"}"#).unwrap().as_str(),
            "hello"
        );
        assert_eq!(
            parse_client_frame("not json").unwrap_err(),
            FrameError::InvalidJson
        );
        assert_eq!(
            parse_client_frame(r#"{"text":"hello"}"#).unwrap_err(),
            FrameError::MissingContent
        );
        assert_eq!(
            parse_client_frame(r#"{"content":""}"#).unwrap_err(),
            FrameError::MissingContent
        );
        assert_eq!(
            parse_client_frame(r#"{"content":12}"#).unwrap_err(),
            FrameError::MissingContent
        );
        assert_eq!(
            parse_client_frame("[1,2]").unwrap_err(),
            FrameError::MissingContent
        );
    }

    #[test]
    fn test_frame_error_text() {
        assert_eq!(FrameError::InvalidJson.to_string(), "Invalid JSON format");
        assert_eq!(
            FrameError::MissingContent.to_string(),
            "Invalid message format. 'content' is required."
        );
    }
}
