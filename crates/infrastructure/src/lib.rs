//! 基础设施层实现。
//!
//! 提供内存与 PostgreSQL 两套仓储、bcrypt 密码哈希，以及按配置组装它们的入口。

pub mod builder;
pub mod memory;
pub mod migrations;
pub mod password;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError};
pub use memory::InMemoryStorage;
pub use migrations::MIGRATOR;
pub use password::BcryptPasswordHasher;
pub use repository::{
    create_pg_pool, PgChatRoomRepository, PgMessageRepository, PgRoomMemberRepository,
    PgStorage, PgUserRepository,
};
