//! Persistence for users and messages.
//!
//! The rest of the daemon only sees the [`ChatStore`] trait. Two backends
//! are provided:
//! - [`MemoryStore`] - process-local, used in tests and when no database
//!   URL is configured
//! - [`SqliteStore`] - durable storage through an `sqlx` SQLite pool
//!
//! Inserts are atomic per call; concurrent inserts are serialized by the
//! backend, so callers only need to order their own follow-up work (cache
//! invalidation) after the awaited insert returns.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use chat_core::{Message, NewMessage, User, UserId};

/// Errors surfaced by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint was violated (duplicate username)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A message referenced a user that does not exist
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    /// Backend failure (I/O, driver, schema)
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable store for users and messages.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Creates a user. Fails with `Conflict` if the username is taken.
    async fn create_user(&self, username: &str) -> StoreResult<User>;

    /// Exact, case-sensitive username lookup.
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn find_user_by_id(&self, id: UserId) -> StoreResult<Option<User>>;

    /// Persists one message and returns it with its assigned id.
    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message>;

    /// Persists a batch atomically: either every message is stored or none.
    async fn insert_messages(&self, messages: Vec<NewMessage>) -> StoreResult<Vec<Message>>;

    /// The `limit` newest messages, newest first, each carrying its sender.
    async fn list_recent_messages(&self, limit: usize) -> StoreResult<Vec<Message>>;
}
