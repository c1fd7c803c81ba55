//! In-memory store backend.

use async_trait::async_trait;
use tokio::sync::RwLock;

use chat_core::{Message, MessageId, NewMessage, User, UserId};

use super::{ChatStore, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    messages: Vec<Message>,
    next_user_id: i64,
    next_message_id: i64,
}

impl Tables {
    fn user(&self, id: UserId) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    fn insert(&mut self, new: NewMessage) -> StoreResult<Message> {
        let user = self
            .user(new.user_id)
            .cloned()
            .ok_or(StoreError::UnknownUser(new.user_id))?;

        self.next_message_id += 1;
        let message = Message::from_new(MessageId::new(self.next_message_id), new, Some(user));
        self.messages.push(message.clone());
        Ok(message)
    }
}

/// Process-local store. Ids start at 1 and are never reused.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub async fn message_count(&self) -> usize {
        self.tables.read().await.messages.len()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_user(&self, username: &str) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|u| u.username == username) {
            return Err(StoreError::Conflict(format!("username '{username}' already exists")));
        }

        tables.next_user_id += 1;
        let user = User::new(UserId::new(tables.next_user_id), username);
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_user_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.user(id).cloned())
    }

    async fn insert_message(&self, message: NewMessage) -> StoreResult<Message> {
        self.tables.write().await.insert(message)
    }

    async fn insert_messages(&self, messages: Vec<NewMessage>) -> StoreResult<Vec<Message>> {
        let mut tables = self.tables.write().await;

        // Check every sender first so a bad row leaves nothing behind
        if let Some(missing) = messages.iter().find(|m| tables.user(m.user_id).is_none()) {
            return Err(StoreError::UnknownUser(missing.user_id));
        }

        messages.into_iter().map(|m| tables.insert(m)).collect()
    }

    async fn list_recent_messages(&self, limit: usize) -> StoreResult<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut messages = tables.messages.clone();
        // Newest first; ties broken by id so the order is deterministic
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        messages.truncate(limit);
        Ok(messages)
    }
}
