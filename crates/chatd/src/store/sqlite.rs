//! SQLite store backend.
//!
//! Timestamps are stored as integer microseconds since the Unix epoch so
//! ordering in SQL matches chronological order exactly.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use chat_core::{Message, MessageId, NewMessage, User, UserId};

use super::{ChatStore, StoreError, StoreResult};

/// Pool size for file-backed databases.
const MAX_CONNECTIONS: u32 = 8;

/// How long a writer waits for another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        content TEXT NOT NULL,
        timestamp_us INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp_us)",
];

/// Store backed by an `sqlx` SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `url`, e.g. `sqlite://chat.db`.
    pub async fn open(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(url, "SQLite store opened");
        Ok(store)
    }

    /// Opens a private in-memory database.
    ///
    /// Each SQLite connection has its own memory database, so the pool is
    /// pinned to one connection that is never recycled.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite schema ready");
        Ok(())
    }

    async fn user_in_tx(tx: &mut Transaction<'_, Sqlite>, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT id, username FROM users WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    /// Writes before reading: a deferred transaction whose first statement
    /// is a read cannot upgrade to a writer while another connection holds
    /// the write lock, and that upgrade failure bypasses the busy timeout.
    /// The foreign key rejects an unknown sender.
    async fn insert_in_tx(tx: &mut Transaction<'_, Sqlite>, mut new: NewMessage) -> StoreResult<Message> {
        let micros = new.timestamp.timestamp_micros();
        let result = sqlx::query("INSERT INTO messages (user_id, content, timestamp_us) VALUES (?, ?, ?)")
            .bind(new.user_id.get())
            .bind(&new.content)
            .bind(micros)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_insert_error(e, new.user_id))?;

        let user = Self::user_in_tx(tx, new.user_id)
            .await?
            .ok_or(StoreError::UnknownUser(new.user_id))?;

        // Match the precision a later read returns
        new.timestamp = timestamp_from_micros(micros)?;
        Ok(Message::from_new(
            MessageId::new(result.last_insert_rowid()),
            new,
            Some(user),
        ))
    }
}

fn user_from_row(row: &SqliteRow) -> StoreResult<User> {
    Ok(User::new(
        UserId::new(row.try_get("id")?),
        row.try_get::<String, _>("username")?,
    ))
}

fn timestamp_from_micros(micros: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {micros}")))
}

fn map_insert_error(err: sqlx::Error, user_id: UserId) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::UnknownUser(user_id),
        _ => err.into(),
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn create_user(&self, username: &str) -> StoreResult<User> {
        let result = sqlx::query("INSERT INTO users (username) VALUES (?)")
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    StoreError::Conflict(format!("username '{username}' already exists"))
                }
                _ => e.into(),
            })?;

        Ok(User::new(UserId::new(result.last_insert_rowid()), username))
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT id, username FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query("SELECT id, username FROM users WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        let mut tx = self.pool.begin().await?;
        let stored = Self::insert_in_tx(&mut tx, message).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn insert_messages(&self, messages: Vec<NewMessage>) -> StoreResult<Vec<Message>> {
        let mut tx = self.pool.begin().await?;
        let mut stored = Vec::with_capacity(messages.len());
        for message in messages {
            // An early return drops the transaction, which rolls it back
            stored.push(Self::insert_in_tx(&mut tx, message).await?);
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn list_recent_messages(&self, limit: usize) -> StoreResult<Vec<Message>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT m.id, m.user_id, m.content, m.timestamp_us, u.username
             FROM messages m
             JOIN users u ON u.id = m.user_id
             ORDER BY m.timestamp_us DESC, m.id DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> StoreResult<Message> {
                let user_id = UserId::new(row.try_get("user_id")?);
                Ok(Message {
                    id: MessageId::new(row.try_get("id")?),
                    user_id,
                    content: row.try_get("content")?,
                    timestamp: timestamp_from_micros(row.try_get("timestamp_us")?)?,
                    user: Some(User::new(user_id, row.try_get::<String, _>("username")?)),
                })
            })
            .collect()
    }
}
