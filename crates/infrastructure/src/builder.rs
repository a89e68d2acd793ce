use std::sync::Arc;

use application::{
    ChatRoomRepository, MessageRepository, PasswordHasher, RoomMemberRepository, UserRepository,
};
use config::{DatabaseConfig, PasswordConfig};
use thiserror::Error;

use crate::{
    memory::InMemoryStorage,
    migrations::MIGRATOR,
    password::BcryptPasswordHasher,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 应用层需要的全部适配器。
#[derive(Clone)]
pub struct Infrastructure {
    pub user_repository: Arc<dyn UserRepository>,
    pub room_repository: Arc<dyn ChatRoomRepository>,
    pub member_repository: Arc<dyn RoomMemberRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
}

impl Infrastructure {
    /// 配置了数据库地址时连接 PostgreSQL（可选执行迁移），否则退回内存存储。
    pub async fn connect(
        database: &DatabaseConfig,
        password: &PasswordConfig,
    ) -> Result<Self, InfrastructureError> {
        let hasher = Arc::new(BcryptPasswordHasher::new(Some(password.bcrypt_cost)));

        let Some(url) = database.url.as_deref() else {
            tracing::warn!("no database url configured, using in-memory storage");
            return Ok(Self::in_memory(hasher));
        };

        let pool = create_pg_pool(url, database.max_connections).await?;
        if database.run_migrations {
            MIGRATOR.run(&pool).await?;
            tracing::info!("database migrations applied");
        }

        let storage = PgStorage::new(pool);
        Ok(Self {
            user_repository: storage.user_repository,
            room_repository: storage.room_repository,
            member_repository: storage.member_repository,
            message_repository: storage.message_repository,
            password_hasher: hasher,
        })
    }

    pub fn in_memory(password_hasher: Arc<dyn PasswordHasher>) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        Self {
            user_repository: storage.clone(),
            room_repository: storage.clone(),
            member_repository: storage.clone(),
            message_repository: storage,
            password_hasher,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{NewChatRoom, NewUser, PasswordHash, UserEmail, Username};

    #[tokio::test]
    async fn test_without_url_falls_back_to_shared_memory_storage() {
        let database = DatabaseConfig {
            url: None,
            max_connections: 1,
            run_migrations: false,
        };
        let infra = Infrastructure::connect(&database, &PasswordConfig { bcrypt_cost: 4 })
            .await
            .unwrap();

        let user = infra
            .user_repository
            .create(NewUser {
                username: Username::parse("alice").unwrap(),
                display_name: None,
                email: UserEmail::parse("alice@example.com").unwrap(),
                password: PasswordHash::new("x").unwrap(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let room = infra
            .room_repository
            .create_with_owner(
                NewChatRoom::new("General", true, Utc::now()).unwrap(),
                user.id,
                Utc::now(),
            )
            .await
            .unwrap();

        // 房间仓储写入的成员关系对成员仓储可见
        assert!(infra
            .member_repository
            .is_member(room.id, user.id)
            .await
            .unwrap());
    }
}
