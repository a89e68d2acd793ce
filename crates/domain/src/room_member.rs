use crate::value_objects::{RoomId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomRole {
    Owner,
    Member,
}

impl RoomRole {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomRole::Owner => "owner",
            RoomRole::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(RoomRole::Owner),
            "member" => Some(RoomRole::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RoomMember {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub role: RoomRole,
    pub joined_at: Timestamp,
}

impl RoomMember {
    pub fn new(room_id: RoomId, user_id: UserId, role: RoomRole, joined_at: Timestamp) -> Self {
        Self {
            room_id,
            user_id,
            role,
            joined_at,
        }
    }

    pub fn is_owner(&self) -> bool {
        self.role == RoomRole::Owner
    }
}
