use crate::value_objects::{PasswordHash, Timestamp, UserEmail, UserId, Username};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: Username,
    pub display_name: Option<String>,
    pub email: UserEmail,
    #[serde(skip_serializing)] // 密码字段不暴露给客户端
    pub password: PasswordHash,
    pub is_active: bool,
    pub created_at: Timestamp,
}

/// 注册时尚未分配 id 的用户。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: Username,
    pub display_name: Option<String>,
    pub email: UserEmail,
    pub password: PasswordHash,
    pub created_at: Timestamp,
}

impl NewUser {
    pub fn into_user(self, id: UserId) -> User {
        User {
            id,
            username: self.username,
            display_name: self.display_name,
            email: self.email,
            password: self.password,
            is_active: true,
            created_at: self.created_at,
        }
    }
}
