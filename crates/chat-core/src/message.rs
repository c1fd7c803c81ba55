//! Chat messages and content validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ValidationError, ValidationResult};
use crate::{User, UserId};

/// Maximum message length, counted in characters rather than bytes.
pub const MAX_MESSAGE_LENGTH: usize = 1000;

/// Numeric message identifier assigned by the store on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub user_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl NewMessage {
    /// Creates a message stamped with the current time.
    pub fn now(user_id: UserId, content: impl Into<String>) -> Self {
        Self::at(user_id, content, Utc::now())
    }

    pub fn at(user_id: UserId, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id,
            content: content.into(),
            timestamp,
        }
    }
}

/// A persisted, immutable chat message.
///
/// `user` is the denormalized sender, filled in by range reads so clients
/// can render history without a second lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub user_id: UserId,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl Message {
    /// Builds the persisted form of a new message.
    pub fn from_new(id: MessageId, new: NewMessage, user: Option<User>) -> Self {
        Self {
            id,
            user_id: new.user_id,
            content: new.content,
            timestamp: new.timestamp,
            user,
        }
    }

    /// Username of the sender, when the row was read with its user.
    pub fn sender_username(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.username.as_str())
    }
}

/// Checks inbound content against the chat rules.
///
/// Rejects empty or whitespace-only content and anything longer than
/// [`MAX_MESSAGE_LENGTH`] characters.
pub fn validate_content(content: &str) -> ValidationResult<()> {
    if content.trim().is_empty() {
        return Err(ValidationError::EmptyContent);
    }

    let length = content.chars().count();
    if length > MAX_MESSAGE_LENGTH {
        return Err(ValidationError::ContentTooLong {
            length,
            max: MAX_MESSAGE_LENGTH,
        });
    }

    Ok(())
}
