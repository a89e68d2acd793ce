use std::sync::Arc;

use application::{
    ChatRoomRepository, MessageFilter, MessageRepository, Page, PageRequest, RoomMemberRepository,
    UserRepository,
};
use async_trait::async_trait;
use domain::{
    ChatRoom, Message, MessageContent, MessageId, NewChatRoom, NewMessage, NewUser,
    PasswordHash, RepositoryError, RoomId, RoomMember, RoomRole, Timestamp, User, UserEmail,
    UserId, Username,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, QueryBuilder};

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(ref db_err) if db_err.code().is_some_and(|code| code == "23505") => {
            RepositoryError::conflict(db_err.constraint().unwrap_or("unique constraint"))
        }
        // 外键不存在
        sqlx::Error::Database(ref db_err) if db_err.code().is_some_and(|code| code == "23503") => {
            RepositoryError::NotFound
        }
        other => RepositoryError::storage(other.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn total_from(count: i64) -> u64 {
    u64::try_from(count).unwrap_or_default()
}

/// `ILIKE` 子串匹配模式，转义通配符。
fn contains_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: i64,
    username: String,
    display_name: Option<String>,
    email: String,
    password_hash: String,
    is_active: bool,
    created_at: Timestamp,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(User {
            id: UserId::new(value.id),
            username: Username::parse(value.username)
                .map_err(|err| invalid_data(err.to_string()))?,
            display_name: value.display_name,
            email: UserEmail::parse(value.email).map_err(|err| invalid_data(err.to_string()))?,
            password: PasswordHash::new(value.password_hash)
                .map_err(|err| invalid_data(err.to_string()))?,
            is_active: value.is_active,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: i64,
    name: String,
    is_private: bool,
    created_at: Timestamp,
}

impl From<RoomRecord> for ChatRoom {
    fn from(value: RoomRecord) -> Self {
        ChatRoom {
            id: RoomId::new(value.id),
            name: value.name,
            is_private: value.is_private,
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MemberRecord {
    chat_id: i64,
    user_id: i64,
    role: String,
    joined_at: Timestamp,
}

impl TryFrom<MemberRecord> for RoomMember {
    type Error = RepositoryError;

    fn try_from(value: MemberRecord) -> Result<Self, Self::Error> {
        let role = RoomRole::parse(&value.role)
            .ok_or_else(|| invalid_data(format!("unknown member role: {}", value.role)))?;
        Ok(RoomMember::new(
            RoomId::new(value.chat_id),
            UserId::new(value.user_id),
            role,
            value.joined_at,
        ))
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: i64,
    chat_id: i64,
    user_id: i64,
    content: String,
    created_at: Timestamp,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        Ok(Message {
            id: MessageId::new(value.id),
            room_id: RoomId::new(value.chat_id),
            sender_id: UserId::new(value.user_id),
            content: MessageContent::new(value.content)
                .map_err(|err| invalid_data(err.to_string()))?,
            created_at: value.created_at,
        })
    }
}

const USER_COLUMNS: &str =
    "id, username, display_name, email, password_hash, is_active, created_at";

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_optional(
        &self,
        query: sqlx::query::QueryAs<'_, Postgres, UserRecord, sqlx::postgres::PgArguments>,
    ) -> Result<Option<User>, RepositoryError> {
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .map(User::try_from)
            .transpose()
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: NewUser) -> Result<User, RepositoryError> {
        let sql = format!(
            "INSERT INTO users (username, display_name, email, password_hash, is_active, created_at) \
             VALUES ($1, $2, $3, $4, TRUE, $5) RETURNING {USER_COLUMNS}"
        );
        let record = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(user.username.as_str())
            .bind(user.display_name.as_deref())
            .bind(user.email.as_str())
            .bind(user.password.as_str())
            .bind(user.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        self.fetch_optional(sqlx::query_as(&sql).bind(id.value()))
            .await
    }

    async fn find_by_username(
        &self,
        username: &Username,
    ) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        self.fetch_optional(sqlx::query_as(&sql).bind(username.as_str()))
            .await
    }

    async fn find_by_email(&self, email: &UserEmail) -> Result<Option<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        self.fetch_optional(sqlx::query_as(&sql).bind(email.as_str()))
            .await
    }

    async fn list(&self, page: PageRequest) -> Result<Page<User>, RepositoryError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT $1 OFFSET $2");
        let records = sqlx::query_as::<_, UserRecord>(&sql)
            .bind(to_i64(page.limit()))
            .bind(to_i64(page.offset()))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let users = records
            .into_iter()
            .map(User::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(users, page, total_from(total)))
    }
}

#[derive(Clone)]
pub struct PgChatRoomRepository {
    pool: PgPool,
}

impl PgChatRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatRoomRepository for PgChatRoomRepository {
    async fn create_with_owner(
        &self,
        room: NewChatRoom,
        owner: UserId,
        joined_at: Timestamp,
    ) -> Result<ChatRoom, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, RoomRecord>(
            r#"
            INSERT INTO chats (name, is_private, created_at)
            VALUES ($1, $2, $3)
            RETURNING id, name, is_private, created_at
            "#,
        )
        .bind(&room.name)
        .bind(room.is_private)
        .bind(room.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO chat_members (chat_id, user_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.id)
        .bind(owner.value())
        .bind(RoomRole::Owner.as_str())
        .bind(joined_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(record.into())
    }

    async fn find_by_id(&self, id: RoomId) -> Result<Option<ChatRoom>, RepositoryError> {
        let record = sqlx::query_as::<_, RoomRecord>(
            "SELECT id, name, is_private, created_at FROM chats WHERE id = $1",
        )
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(record.map(ChatRoom::from))
    }

    async fn list(
        &self,
        search: Option<String>,
        page: PageRequest,
    ) -> Result<Page<ChatRoom>, RepositoryError> {
        let pattern = search.as_deref().map(contains_pattern);

        let records = sqlx::query_as::<_, RoomRecord>(
            r#"
            SELECT id, name, is_private, created_at FROM chats
            WHERE ($1::TEXT IS NULL OR name ILIKE $1)
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(pattern.as_deref())
        .bind(to_i64(page.limit()))
        .bind(to_i64(page.offset()))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chats WHERE ($1::TEXT IS NULL OR name ILIKE $1)")
                .bind(pattern.as_deref())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_err)?;

        let rooms = records.into_iter().map(ChatRoom::from).collect();
        Ok(Page::new(rooms, page, total_from(total)))
    }
}

#[derive(Clone)]
pub struct PgRoomMemberRepository {
    pool: PgPool,
}

impl PgRoomMemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomMemberRepository for PgRoomMemberRepository {
    async fn add(&self, member: RoomMember) -> Result<RoomMember, RepositoryError> {
        // 冲突时保留原有角色，返回已存在的记录
        let record = sqlx::query_as::<_, MemberRecord>(
            r#"
            INSERT INTO chat_members (chat_id, user_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chat_id, user_id) DO UPDATE SET role = chat_members.role
            RETURNING chat_id, user_id, role, joined_at
            "#,
        )
        .bind(member.room_id.value())
        .bind(member.user_id.value())
        .bind(member.role.as_str())
        .bind(member.joined_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        RoomMember::try_from(record)
    }

    async fn find(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<Option<RoomMember>, RepositoryError> {
        sqlx::query_as::<_, MemberRecord>(
            r#"
            SELECT chat_id, user_id, role, joined_at FROM chat_members
            WHERE chat_id = $1 AND user_id = $2
            "#,
        )
        .bind(room_id.value())
        .bind(user_id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .map(RoomMember::try_from)
        .transpose()
    }

    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM chat_members WHERE chat_id = $1 AND user_id = $2)",
        )
        .bind(room_id.value())
        .bind(user_id.value())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn push_message_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &MessageFilter) {
    if let Some(user_id) = filter.user_id {
        builder.push(" AND user_id = ").push_bind(user_id.value());
    }
    if let Some(room_id) = filter.room_id {
        builder.push(" AND chat_id = ").push_bind(room_id.value());
    }
    if let Some(text) = &filter.text {
        builder
            .push(" AND content ILIKE ")
            .push_bind(contains_pattern(text));
    }
    if let Some(start) = filter.start {
        builder.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = filter.end {
        builder.push(" AND created_at <= ").push_bind(end);
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: NewMessage) -> Result<Message, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (chat_id, user_id, content)
            VALUES ($1, $2, $3)
            RETURNING id, chat_id, user_id, content, created_at
            "#,
        )
        .bind(message.room_id.value())
        .bind(message.sender_id.value())
        .bind(message.content.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        sqlx::query_as::<_, MessageRecord>(
            "SELECT id, chat_id, user_id, content, created_at FROM messages WHERE id = $1",
        )
        .bind(id.value())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .map(Message::try_from)
        .transpose()
    }

    async fn search(
        &self,
        filter: &MessageFilter,
        page: PageRequest,
    ) -> Result<Page<Message>, RepositoryError> {
        let mut query = QueryBuilder::<Postgres>::new(
            "SELECT id, chat_id, user_id, content, created_at FROM messages WHERE TRUE",
        );
        push_message_filters(&mut query, filter);
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(to_i64(page.limit()))
            .push(" OFFSET ")
            .push_bind(to_i64(page.offset()));
        let records = query
            .build_query_as::<MessageRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM messages WHERE TRUE");
        push_message_filters(&mut count, filter);
        let total: i64 = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let messages = records
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(messages, page, total_from(total)))
    }
}

/// 四个 PostgreSQL 仓储共用一个连接池。
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub room_repository: Arc<PgChatRoomRepository>,
    pub member_repository: Arc<PgRoomMemberRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            room_repository: Arc::new(PgChatRoomRepository::new(pool.clone())),
            member_repository: Arc::new(PgRoomMemberRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("rust"), "%rust%");
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn test_filters_only_add_present_clauses() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT 1 FROM messages WHERE TRUE");
        push_message_filters(
            &mut query,
            &MessageFilter {
                room_id: Some(RoomId::new(5)),
                text: Some("hi".into()),
                ..MessageFilter::default()
            },
        );
        assert_eq!(
            query.sql(),
            "SELECT 1 FROM messages WHERE TRUE AND chat_id = $1 AND content ILIKE $2"
        );
    }

    #[test]
    fn test_unknown_role_is_invalid_data() {
        let record = MemberRecord {
            chat_id: 1,
            user_id: 1,
            role: "admin".into(),
            joined_at: chrono::Utc::now(),
        };
        assert!(matches!(
            RoomMember::try_from(record),
            Err(RepositoryError::Storage { .. })
        ));
    }
}
