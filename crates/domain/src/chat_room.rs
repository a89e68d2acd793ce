use crate::errors::DomainError;
use crate::value_objects::{RoomId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: String,
    pub is_private: bool,
    pub created_at: Timestamp,
}

/// 尚未持久化的聊天室。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatRoom {
    pub name: String,
    pub is_private: bool,
    pub created_at: Timestamp,
}

impl NewChatRoom {
    pub const MAX_NAME_LEN: usize = 128;

    pub fn new(
        name: impl Into<String>,
        is_private: bool,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let name = Self::validate_name(name.into())?;
        Ok(Self {
            name,
            is_private,
            created_at,
        })
    }

    pub fn into_room(self, id: RoomId) -> ChatRoom {
        ChatRoom {
            id,
            name: self.name,
            is_private: self.is_private,
            created_at: self.created_at,
        }
    }

    fn validate_name(name: String) -> Result<String, DomainError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("name", "cannot be empty"));
        }
        if trimmed.chars().count() > Self::MAX_NAME_LEN {
            return Err(DomainError::invalid_argument("name", "too long"));
        }
        Ok(trimmed.to_owned())
    }
}

impl ChatRoom {
    /// 名称是否包含搜索词（不区分大小写）。
    pub fn name_matches(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(&needle.to_lowercase())
    }
}
