//! Message Service: read-through recent history and invalidating writes.
//!
//! `get_recent_messages` serves the cached list when present and otherwise
//! reads the store, re-sorts oldest first and repopulates the cache.
//! Writes go to the store first; the cache entry is dropped only after the
//! insert has committed, so a failed insert leaves the cache untouched.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use chat_core::{Message, NewMessage};

use crate::cache::{CacheStats, Lookup, TtlCache, RECENT_MESSAGES_KEY};
use crate::error::ChatResult;
use crate::store::ChatStore;

/// Size of the recent-history view.
pub const DEFAULT_MESSAGE_LIMIT: usize = 50;

/// How long the recent-history list stays cached.
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(300);

/// Shared, immutable snapshot of recent history.
pub type MessageList = Arc<Vec<Message>>;

/// Cache type the service expects.
pub type MessageCache = TtlCache<MessageList>;

pub struct MessageService {
    store: Arc<dyn ChatStore>,
    cache: Arc<MessageCache>,
    cache_duration: Duration,
}

impl MessageService {
    pub fn new(store: Arc<dyn ChatStore>, cache: Arc<MessageCache>, cache_duration: Duration) -> Self {
        Self {
            store,
            cache,
            cache_duration,
        }
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Most recent messages, oldest first.
    ///
    /// The cached list is keyed without the limit: a call made while an
    /// entry is live returns that entry whatever `limit` it was filled with.
    /// Store failures are returned and nothing is cached.
    pub async fn get_recent_messages(&self, limit: usize) -> ChatResult<MessageList> {
        let generation = match self.cache.lookup(RECENT_MESSAGES_KEY) {
            Lookup::Hit(messages) => {
                info!(count = messages.len(), "Retrieved messages from cache");
                return Ok(messages);
            }
            Lookup::Miss(generation) => generation,
        };

        let started = Instant::now();
        let mut messages = self.store.list_recent_messages(limit).await.map_err(|e| {
            error!(error = %e, "Error retrieving recent messages");
            e
        })?;
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

        let messages = Arc::new(messages);
        let cached = self.cache.set_if_fresh(
            RECENT_MESSAGES_KEY,
            Arc::clone(&messages),
            self.cache_duration,
            generation,
        );

        if cached {
            info!(
                count = messages.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Retrieved messages from store and cached"
            );
        } else {
            warn!(
                count = messages.len(),
                "Cache invalidated during read; result not cached"
            );
        }

        Ok(messages)
    }

    /// Persists one message, then drops the cached history.
    pub async fn add_message(&self, message: NewMessage) -> ChatResult<Message> {
        let user_id = message.user_id;
        let stored = self.store.insert_message(message).await.map_err(|e| {
            error!(user_id = %user_id, error = %e, "Error adding message");
            e
        })?;

        self.cache.invalidate(RECENT_MESSAGES_KEY);
        info!(
            user_id = %user_id,
            message_id = %stored.id,
            "Cache invalidated after new message"
        );
        Ok(stored)
    }

    /// Persists a batch atomically, then drops the cached history once.
    pub async fn add_messages(&self, messages: Vec<NewMessage>) -> ChatResult<Vec<Message>> {
        let requested = messages.len();
        let stored = self.store.insert_messages(messages).await.map_err(|e| {
            error!(count = requested, error = %e, "Error adding messages");
            e
        })?;

        self.cache.invalidate(RECENT_MESSAGES_KEY);
        info!(count = stored.len(), "Cache invalidated after bulk insert");
        Ok(stored)
    }

    /// Pre-populates the recent-history entry.
    ///
    /// Failures are logged and swallowed; a cold cache only costs the first
    /// reader a store round trip.
    pub async fn warm_cache(&self) {
        info!("Starting cache warm-up");
        match self.get_recent_messages(DEFAULT_MESSAGE_LIMIT).await {
            Ok(messages) => info!(count = messages.len(), "Cache warm-up completed"),
            Err(e) => error!(error = %e, "Error during cache warm-up"),
        }
    }
}
