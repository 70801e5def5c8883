use application::repository::{MessageRepository, RoomRepository, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Attachment, AttachmentId, Message, MessageCursor, MessageId, RepositoryError, Room, RoomId,
    RoomKind, RoomMembership, Timestamp, User, UserId, UserStatus,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        other => RepositoryError::storage(other.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

pub async fn create_pg_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// 房间外键列名，只来自这三个常量
fn room_column(kind: RoomKind) -> &'static str {
    match kind {
        RoomKind::Chat => "chat_id",
        RoomKind::Group => "group_id",
        RoomKind::Channel => "channel_id",
    }
}

/// 私聊用户对的规范顺序
fn ordered_pair(a: UserId, b: UserId) -> (Uuid, Uuid) {
    let (a, b) = (Uuid::from(a), Uuid::from(b));
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// `ILIKE` 模式，转义通配符
fn contains_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    name: String,
    last_name: Option<String>,
    img_url: Option<String>,
    status: String,
    last_active: Option<DateTime<Utc>>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let status: UserStatus = value
            .status
            .parse()
            .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?;
        Ok(User {
            id: UserId::from(value.id),
            name: value.name,
            last_name: value.last_name,
            image_url: value.img_url,
            status,
            last_active: value.last_active,
        })
    }
}

#[derive(Debug, FromRow)]
struct OwnedRoomRecord {
    id: Uuid,
    name: String,
    owner_id: Uuid,
    img_url: Option<String>,
    is_public: bool,
    created_at: DateTime<Utc>,
}

impl OwnedRoomRecord {
    fn into_room(self, kind: RoomKind) -> Room {
        Room {
            id: RoomId::new(kind, self.id),
            name: Some(self.name),
            owner_id: Some(UserId::from(self.owner_id)),
            image_url: self.img_url,
            is_public: self.is_public,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MembershipRecord {
    user_id: Uuid,
    chat_id: Option<Uuid>,
    group_id: Option<Uuid>,
    channel_id: Option<Uuid>,
    joined_at: DateTime<Utc>,
    last_message_time: Option<DateTime<Utc>>,
}

impl TryFrom<MembershipRecord> for RoomMembership {
    type Error = RepositoryError;

    fn try_from(value: MembershipRecord) -> Result<Self, Self::Error> {
        let room_id = RoomId::from_foreign_keys(value.chat_id, value.group_id, value.channel_id)
            .map_err(|err| invalid_data(err.to_string()))?;
        Ok(RoomMembership {
            room_id,
            user_id: UserId::from(value.user_id),
            joined_at: value.joined_at,
            last_message_time: value.last_message_time,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    user_id: Uuid,
    chat_id: Option<Uuid>,
    group_id: Option<Uuid>,
    channel_id: Option<Uuid>,
    text: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    original_message_id: Option<Uuid>,
    forwarded_message_id: Option<Uuid>,
    is_edited: bool,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let room_id = RoomId::from_foreign_keys(value.chat_id, value.group_id, value.channel_id)
            .map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: MessageId::from(value.id),
            room_id,
            sender_id: UserId::from(value.user_id),
            text: value.text,
            created_at: value.created_at,
            updated_at: value.updated_at,
            original_message_id: value.original_message_id.map(MessageId::from),
            forwarded_message_id: value.forwarded_message_id.map(MessageId::from),
            is_edited: value.is_edited,
            deleted_at: value.deleted_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AttachmentRecord {
    id: Uuid,
    message_id: Uuid,
    key: String,
    name: String,
    persist_name: bool,
    file_size: Option<i64>,
    preview_blob: Option<String>,
}

impl From<AttachmentRecord> for Attachment {
    fn from(value: AttachmentRecord) -> Self {
        Attachment {
            id: AttachmentId::from(value.id),
            message_id: MessageId::from(value.message_id),
            key: value.key,
            name: value.name,
            persist_name: value.persist_name,
            file_size: value.file_size,
            preview_blob: value.preview_blob,
        }
    }
}

const USER_COLUMNS: &str = "id, name, last_name, img_url, status, last_active";
const MESSAGE_COLUMNS: &str = "id, user_id, chat_id, group_id, channel_id, text, created_at, \
     updated_at, original_message_id, forwarded_message_id, is_edited, deleted_at";

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(User::try_from).transpose()
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>, RepositoryError> {
        let ids: Vec<Uuid> = ids.iter().copied().map(Uuid::from).collect();
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(User::try_from).collect()
    }

    async fn update_status(
        &self,
        id: UserId,
        status: UserStatus,
        last_active: Option<Timestamp>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET status = $2, last_active = COALESCE($3, last_active)
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(id))
        .bind(status.as_str())
        .bind(last_active)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<User>, RepositoryError> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            SELECT {USER_COLUMNS} FROM users
            WHERE name ILIKE $1 OR last_name ILIKE $1
            ORDER BY name
            LIMIT $2
            "#
        ))
        .bind(contains_pattern(query))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(User::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_members(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        room_id: RoomId,
        users: &[UserId],
        at: Timestamp,
    ) -> Result<Vec<UserId>, RepositoryError> {
        if users.is_empty() {
            return Ok(Vec::new());
        }
        let column = room_column(room_id.kind());
        let ids: Vec<Uuid> = users.iter().copied().map(Uuid::from).collect();
        let added: Vec<Uuid> = sqlx::query_scalar(&format!(
            r#"
            INSERT INTO room_members (user_id, {column}, joined_at)
            SELECT member, $2, $3 FROM UNNEST($1::uuid[]) AS member
            ON CONFLICT ({column}, user_id) WHERE {column} IS NOT NULL DO NOTHING
            RETURNING user_id
            "#
        ))
        .bind(&ids)
        .bind(room_id.uuid())
        .bind(at)
        .fetch_all(&mut **tx)
        .await
        .map_err(map_sqlx_err)?;
        Ok(added.into_iter().map(UserId::from).collect())
    }
}

#[async_trait]
impl RoomRepository for PgRoomRepository {
    async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError> {
        let room = match id.kind() {
            RoomKind::Chat => {
                let created_at: Option<DateTime<Utc>> =
                    sqlx::query_scalar("SELECT created_at FROM chats WHERE id = $1")
                        .bind(id.uuid())
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(map_sqlx_err)?;
                created_at.map(|at| Room::direct_chat(id, at))
            }
            RoomKind::Group => sqlx::query_as::<_, OwnedRoomRecord>(
                "SELECT id, name, owner_id, img_url, FALSE AS is_public, created_at FROM groups WHERE id = $1",
            )
            .bind(id.uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .map(|record| record.into_room(RoomKind::Group)),
            RoomKind::Channel => sqlx::query_as::<_, OwnedRoomRecord>(
                "SELECT id, name, owner_id, img_url, is_public, created_at FROM channels WHERE id = $1",
            )
            .bind(id.uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .map(|record| record.into_room(RoomKind::Channel)),
        };
        Ok(room)
    }

    async fn create_with_members(
        &self,
        room: Room,
        members: &[UserId],
    ) -> Result<Room, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        match room.id.kind() {
            RoomKind::Chat => {
                let [a, b] = members else {
                    return Err(invalid_data("direct chat requires exactly two members"));
                };
                let (low, high) = ordered_pair(*a, *b);
                sqlx::query(
                    "INSERT INTO chats (id, user_low, user_high, created_at) VALUES ($1, $2, $3, $4)",
                )
                .bind(room.id.uuid())
                .bind(low)
                .bind(high)
                .bind(room.created_at)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            }
            RoomKind::Group => {
                sqlx::query(
                    r#"
                    INSERT INTO groups (id, name, owner_id, img_url, created_at)
                    VALUES ($1, $2, $3, $4, $5)
                    "#,
                )
                .bind(room.id.uuid())
                .bind(room.name.as_deref())
                .bind(room.owner_id.map(Uuid::from))
                .bind(room.image_url.as_deref())
                .bind(room.created_at)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            }
            RoomKind::Channel => {
                sqlx::query(
                    r#"
                    INSERT INTO channels (id, name, owner_id, img_url, is_public, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(room.id.uuid())
                .bind(room.name.as_deref())
                .bind(room.owner_id.map(Uuid::from))
                .bind(room.image_url.as_deref())
                .bind(room.is_public)
                .bind(room.created_at)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            }
        }
        Self::insert_members(&mut tx, room.id, members, room.created_at).await?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(room)
    }

    async fn find_or_create_direct_chat(
        &self,
        a: UserId,
        b: UserId,
        at: Timestamp,
    ) -> Result<RoomId, RepositoryError> {
        let (low, high) = ordered_pair(a, b);
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 并发插入同一用户对时，后到者在唯一索引上等待前者提交，然后什么也不做
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO chats (id, user_low, user_high, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_low, user_high) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(low)
        .bind(high)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        let room_id = match inserted {
            Some(id) => {
                let room_id = RoomId::Chat(id);
                Self::insert_members(&mut tx, room_id, &[a, b], at).await?;
                tracing::info!(room_id = %room_id, "私聊房间已创建");
                room_id
            }
            None => {
                let id: Uuid = sqlx::query_scalar(
                    "SELECT id FROM chats WHERE user_low = $1 AND user_high = $2",
                )
                .bind(low)
                .bind(high)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
                RoomId::Chat(id)
            }
        };
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(room_id)
    }

    async fn find_direct_chat(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<RoomId>, RepositoryError> {
        let (low, high) = ordered_pair(a, b);
        let id: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM chats WHERE user_low = $1 AND user_high = $2")
                .bind(low)
                .bind(high)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        Ok(id.map(RoomId::Chat))
    }

    async fn members_of(&self, room_id: RoomId) -> Result<Vec<UserId>, RepositoryError> {
        let column = room_column(room_id.kind());
        let ids: Vec<Uuid> = sqlx::query_scalar(&format!(
            "SELECT user_id FROM room_members WHERE {column} = $1 ORDER BY joined_at"
        ))
        .bind(room_id.uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(ids.into_iter().map(UserId::from).collect())
    }

    async fn is_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool, RepositoryError> {
        let column = room_column(room_id.kind());
        sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM room_members WHERE {column} = $1 AND user_id = $2)"
        ))
        .bind(room_id.uuid())
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }

    async fn add_members(
        &self,
        room_id: RoomId,
        users: &[UserId],
        at: Timestamp,
    ) -> Result<Vec<UserId>, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;
        let added = Self::insert_members(&mut tx, room_id, users, at).await?;
        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(added)
    }

    async fn remove_member(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        let column = room_column(room_id.kind());
        let result = sqlx::query(&format!(
            "DELETE FROM room_members WHERE {column} = $1 AND user_id = $2"
        ))
        .bind(room_id.uuid())
        .bind(Uuid::from(user_id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn memberships_of(
        &self,
        user_id: UserId,
        limit: u32,
    ) -> Result<Vec<RoomMembership>, RepositoryError> {
        let records = sqlx::query_as::<_, MembershipRecord>(
            r#"
            SELECT user_id, chat_id, group_id, channel_id, joined_at, last_message_time
            FROM room_members
            WHERE user_id = $1
            ORDER BY last_message_time DESC NULLS LAST, joined_at DESC
            LIMIT $2
            "#,
        )
        .bind(Uuid::from(user_id))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        records.into_iter().map(RoomMembership::try_from).collect()
    }

    async fn direct_chat_partners(&self, user_id: UserId) -> Result<Vec<UserId>, RepositoryError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT CASE WHEN user_low = $1 THEN user_high ELSE user_low END
            FROM chats
            WHERE user_low = $1 OR user_high = $1
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(ids.into_iter().map(UserId::from).collect())
    }

    async fn touch_last_message(
        &self,
        room_id: RoomId,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let column = room_column(room_id.kind());
        sqlx::query(&format!(
            "UPDATE room_members SET last_message_time = $2 WHERE {column} = $1"
        ))
        .bind(room_id.uuid())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn search_public_channels(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<Room>, RepositoryError> {
        let records = sqlx::query_as::<_, OwnedRoomRecord>(
            r#"
            SELECT id, name, owner_id, img_url, is_public, created_at
            FROM channels
            WHERE is_public AND name ILIKE $1
            ORDER BY name
            LIMIT $2
            "#,
        )
        .bind(contains_pattern(query))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records
            .into_iter()
            .map(|record| record.into_room(RoomKind::Channel))
            .collect())
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

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create_with_attachments(
        &self,
        message: &Message,
        attachments: &[Attachment],
    ) -> Result<(), RepositoryError> {
        let (chat_id, group_id, channel_id) = message.room_id.foreign_keys();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, user_id, chat_id, group_id, channel_id, text, created_at,
                                  updated_at, original_message_id, forwarded_message_id, is_edited)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.sender_id))
        .bind(chat_id)
        .bind(group_id)
        .bind(channel_id)
        .bind(&message.text)
        .bind(message.created_at)
        .bind(message.updated_at)
        .bind(message.original_message_id.map(Uuid::from))
        .bind(message.forwarded_message_id.map(Uuid::from))
        .bind(message.is_edited)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        if !attachments.is_empty() {
            let mut builder = QueryBuilder::<Postgres>::new(
                "INSERT INTO attachments (id, message_id, key, name, persist_name, file_size, preview_blob) ",
            );
            builder.push_values(attachments, |mut row, attachment| {
                row.push_bind(Uuid::from(attachment.id))
                    .push_bind(Uuid::from(attachment.message_id))
                    .push_bind(&attachment.key)
                    .push_bind(&attachment.name)
                    .push_bind(attachment.persist_name)
                    .push_bind(attachment.file_size)
                    .push_bind(&attachment.preview_blob);
            });
            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        record.map(Message::try_from).transpose()
    }

    async fn update_text(&self, message: &Message) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET text = $2, updated_at = $3, is_edited = $4
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(&message.text)
        .bind(message.updated_at)
        .bind(message.is_edited)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn soft_delete(&self, id: MessageId, at: Timestamp) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE messages SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(Uuid::from(id))
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn page(
        &self,
        room_id: RoomId,
        before: Option<MessageCursor>,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let column = room_column(room_id.kind());
        // 行值比较与 (created_at DESC, id DESC) 索引顺序一致；已删除消息只在结果中过滤
        let records = match before {
            None => {
                sqlx::query_as::<_, MessageRecord>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE {column} = $1 AND deleted_at IS NULL
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#
                ))
                .bind(room_id.uuid())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await
            }
            Some(cursor) => {
                sqlx::query_as::<_, MessageRecord>(&format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE {column} = $1 AND deleted_at IS NULL
                      AND (created_at, id) < ($2, $3)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $4
                    "#
                ))
                .bind(room_id.uuid())
                .bind(cursor.created_at)
                .bind(Uuid::from(cursor.id))
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(map_sqlx_err)?;
        records.into_iter().map(Message::try_from).collect()
    }

    async fn attachments_of(
        &self,
        message_ids: &[MessageId],
    ) -> Result<Vec<Attachment>, RepositoryError> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = message_ids.iter().copied().map(Uuid::from).collect();
        let records = sqlx::query_as::<_, AttachmentRecord>(
            r#"
            SELECT id, message_id, key, name, persist_name, file_size, preview_blob
            FROM attachments
            WHERE message_id = ANY($1)
            ORDER BY message_id, id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(records.into_iter().map(Attachment::from).collect())
    }
}

/// 三个仓储共享同一个连接池
#[derive(Clone)]
pub struct PgStorage {
    pub user_repository: PgUserRepository,
    pub room_repository: PgRoomRepository,
    pub message_repository: PgMessageRepository,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: PgUserRepository::new(pool.clone()),
            room_repository: PgRoomRepository::new(pool.clone()),
            message_repository: PgMessageRepository::new(pool),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_order_is_canonical() {
        let (a, b) = (UserId::generate(), UserId::generate());
        assert_eq!(ordered_pair(a, b), ordered_pair(b, a));
        let (low, high) = ordered_pair(a, b);
        assert!(low < high);
    }

    #[test]
    fn search_pattern_escapes_wildcards() {
        assert_eq!(contains_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn room_columns_follow_kind() {
        assert_eq!(room_column(RoomKind::Chat), "chat_id");
        assert_eq!(room_column(RoomKind::Group), "group_id");
        assert_eq!(room_column(RoomKind::Channel), "channel_id");
    }
}
