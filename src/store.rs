//! Relational store
//!
//! `Store` is the query contract the core needs; the store itself is the single
//! source of truth for users, conversations, requests and messages. `SqliteStore`
//! implements it on sqlx.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{ChatMessage, ConversationSummary, MessageKind, NewMessage, RequestStatus, User};
use crate::types::{ConversationId, MessageId, ShortCode, UserId};

/// Queries the core issues against the relational store
#[async_trait]
pub trait Store: Send + Sync {
    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError>;

    /// User attached to a live, unexpired session token
    async fn user_by_session(&self, token: &str) -> Result<Option<User>, StoreError>;

    /// Users whose short code matches, at most `limit` of them
    async fn users_by_code(&self, code: &ShortCode, limit: u32) -> Result<Vec<User>, StoreError>;

    /// Existing non-group conversation whose members include both users
    async fn find_dm(&self, a: UserId, b: UserId) -> Result<Option<ConversationId>, StoreError>;

    /// Create the conversation for the pair, or return the one a concurrent
    /// creator already inserted
    async fn create_dm(&self, a: UserId, b: UserId) -> Result<ConversationId, StoreError>;

    async fn is_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<bool, StoreError>;

    /// 1:1 conversations of a user, newest first
    async fn list_dms(&self, user: UserId) -> Result<Vec<ConversationSummary>, StoreError>;

    async fn request_status(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<Option<RequestStatus>, StoreError>;

    /// Create a pending request, reopening a settled one for the same ordered pair
    async fn open_request(&self, from: UserId, to: UserId) -> Result<(), StoreError>;

    /// Move a pending request to `status`. False if no pending request matched.
    async fn settle_request(
        &self,
        from: UserId,
        to: UserId,
        status: RequestStatus,
    ) -> Result<bool, StoreError>;

    /// Senders of all pending requests addressed to `to`, oldest first
    async fn pending_requesters(&self, to: UserId) -> Result<Vec<User>, StoreError>;

    /// Persist a message and return its committed form
    async fn insert_message(&self, msg: &NewMessage) -> Result<ChatMessage, StoreError>;

    /// Most recent `limit` messages of a conversation, oldest first
    async fn recent_messages(
        &self,
        conversation: ConversationId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, StoreError>;
}

type UserRow = (String, String, Option<String>);
type MessageRow = (
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    Option<String>,
    Option<String>,
);

const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.sender_id, m.message_type, m.content, \
     m.media_url, m.created_at, u.name, u.avatar_url";

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::Corrupt(format!("bad uuid '{}': {}", s, e)))
}

fn user_from_row((id, name, avatar_url): UserRow) -> Result<User, StoreError> {
    Ok(User {
        id: UserId(parse_uuid(&id)?),
        name,
        avatar_url,
    })
}

fn message_from_row(row: MessageRow) -> Result<ChatMessage, StoreError> {
    let (id, conversation_id, sender_id, kind, content, media_url, created_at, name, avatar) = row;
    Ok(ChatMessage {
        id: Some(MessageId(id)),
        temp_id: None,
        conversation_id: ConversationId(parse_uuid(&conversation_id)?),
        sender_id: UserId(parse_uuid(&sender_id)?),
        sender_name: name,
        sender_avatar: avatar,
        message_type: MessageKind::parse(&kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown message type '{}'", kind)))?,
        content,
        media_url,
        created_at: DateTime::<Utc>::from_timestamp_millis(created_at)
            .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp {}", created_at)))?,
        optimistic: false,
    })
}

/// Canonical key of an unordered user pair
fn dm_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", lo, hi)
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        info!("Connecting to database {}", database_url);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database on a single pinned connection
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables if they don't exist
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                avatar_url TEXT
            )"#,
            // Written by the identity provider
            r#"CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )"#,
            // dm_key is the uniqueness guard for one conversation per pair
            r#"CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                is_group INTEGER NOT NULL DEFAULT 0,
                created_by TEXT,
                dm_key TEXT UNIQUE,
                created_at INTEGER NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS conversation_participants (
                conversation_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS connection_requests (
                from_user_id TEXT NOT NULL,
                to_user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (from_user_id, to_user_id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                message_type TEXT NOT NULL,
                content TEXT,
                media_url TEXT,
                created_at INTEGER NOT NULL
            )"#,
            "CREATE INDEX IF NOT EXISTS messages_by_conversation ON messages (conversation_id, created_at)",
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Database schema ready");
        Ok(())
    }

    /// Insert or update a user record
    pub async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, name, avatar_url) VALUES (?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, avatar_url = excluded.avatar_url",
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.avatar_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a session token for a user
    pub async fn insert_session(
        &self,
        token: &str,
        user_id: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(user_id.to_string())
            .bind(expires_at.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT id, name, avatar_url FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(user_from_row).transpose()
    }

    async fn user_by_session(&self, token: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT u.id, u.name, u.avatar_url FROM sessions s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.token = ? AND s.expires_at > ?",
        )
        .bind(token)
        .bind(Utc::now().timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;
        row.map(user_from_row).transpose()
    }

    async fn users_by_code(&self, code: &ShortCode, limit: u32) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, name, avatar_url FROM users WHERE substr(id, 1, 8) = ? LIMIT ?",
        )
        .bind(code.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(user_from_row).collect()
    }

    async fn find_dm(&self, a: UserId, b: UserId) -> Result<Option<ConversationId>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT c.id FROM conversations c \
             JOIN conversation_participants cp1 ON cp1.conversation_id = c.id AND cp1.user_id = ? \
             JOIN conversation_participants cp2 ON cp2.conversation_id = c.id AND cp2.user_id = ? \
             WHERE c.is_group = 0 \
             ORDER BY c.created_at \
             LIMIT 1",
        )
        .bind(a.to_string())
        .bind(b.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(id,)| parse_uuid(&id).map(ConversationId)).transpose()
    }

    async fn create_dm(&self, a: UserId, b: UserId) -> Result<ConversationId, StoreError> {
        let key = dm_key(a, b);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO conversations (id, is_group, created_by, dm_key, created_at) \
             VALUES (?, 0, ?, ?, ?) ON CONFLICT (dm_key) DO NOTHING",
        )
        .bind(ConversationId::new().to_string())
        .bind(a.to_string())
        .bind(&key)
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        let (id,): (String,) = sqlx::query_as("SELECT id FROM conversations WHERE dm_key = ?")
            .bind(&key)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO conversation_participants (conversation_id, user_id) VALUES (?, ?), (?, ?) \
             ON CONFLICT (conversation_id, user_id) DO NOTHING",
        )
        .bind(&id)
        .bind(a.to_string())
        .bind(&id)
        .bind(b.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ConversationId(parse_uuid(&id)?))
    }

    async fn is_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT 1 FROM conversation_participants WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation.to_string())
        .bind(user.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn list_dms(&self, user: UserId) -> Result<Vec<ConversationSummary>, StoreError> {
        let rows: Vec<(String, String, String, Option<String>)> = sqlx::query_as(
            "SELECT c.id, u.id, u.name, u.avatar_url FROM conversations c \
             JOIN conversation_participants cp ON cp.conversation_id = c.id AND cp.user_id = ? \
             JOIN conversation_participants cp2 ON cp2.conversation_id = c.id AND cp2.user_id != ? \
             JOIN users u ON u.id = cp2.user_id \
             WHERE c.is_group = 0 \
             ORDER BY c.created_at DESC",
        )
        .bind(user.to_string())
        .bind(user.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(conversation_id, peer_id, peer_name, peer_avatar)| {
                let peer_id = UserId(parse_uuid(&peer_id)?);
                Ok(ConversationSummary {
                    conversation_id: ConversationId(parse_uuid(&conversation_id)?),
                    peer_id,
                    peer_code: ShortCode::of(&peer_id),
                    peer_name,
                    peer_avatar,
                })
            })
            .collect()
    }

    async fn request_status(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<Option<RequestStatus>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM connection_requests WHERE from_user_id = ? AND to_user_id = ?",
        )
        .bind(from.to_string())
        .bind(to.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(status,)| {
            RequestStatus::parse(&status)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown request status '{}'", status)))
        })
        .transpose()
    }

    async fn open_request(&self, from: UserId, to: UserId) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO connection_requests (from_user_id, to_user_id, status, created_at) \
             VALUES (?, ?, 'pending', ?) \
             ON CONFLICT (from_user_id, to_user_id) \
             DO UPDATE SET status = 'pending', created_at = excluded.created_at",
        )
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn settle_request(
        &self,
        from: UserId,
        to: UserId,
        status: RequestStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE connection_requests SET status = ? \
             WHERE from_user_id = ? AND to_user_id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(from.to_string())
        .bind(to.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn pending_requesters(&self, to: UserId) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT u.id, u.name, u.avatar_url FROM connection_requests cr \
             JOIN users u ON u.id = cr.from_user_id \
             WHERE cr.to_user_id = ? AND cr.status = 'pending' \
             ORDER BY cr.created_at",
        )
        .bind(to.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(user_from_row).collect()
    }

    async fn insert_message(&self, msg: &NewMessage) -> Result<ChatMessage, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO messages (conversation_id, sender_id, message_type, content, media_url, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(msg.conversation_id.to_string())
        .bind(msg.sender_id.to_string())
        .bind(msg.kind.as_str())
        .bind(&msg.content)
        .bind(&msg.media_url)
        .bind(msg.created_at.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        let row: MessageRow = sqlx::query_as(&format!(
            "SELECT {} FROM messages m LEFT JOIN users u ON u.id = m.sender_id WHERE m.id = ?",
            MESSAGE_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        message_from_row(row)
    }

    async fn recent_messages(
        &self,
        conversation: ConversationId,
        limit: u32,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT {} FROM messages m LEFT JOIN users u ON u.id = m.sender_id \
             WHERE m.conversation_id = ? \
             ORDER BY m.created_at DESC, m.id DESC \
             LIMIT ?",
            MESSAGE_COLUMNS
        ))
        .bind(conversation.to_string())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows
            .into_iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}
