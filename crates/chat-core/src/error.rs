//! Validation errors for inbound chat messages.

use crate::UserId;
use thiserror::Error;

/// Reasons an inbound message is rejected before it reaches storage.
///
/// The display text is what the originating client sees, so it must never
/// carry internal detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Content is empty or only whitespace
    #[error("Message cannot be empty")]
    EmptyContent,

    /// Content is longer than the allowed number of characters
    #[error("Message exceeds maximum length of {max} characters")]
    ContentTooLong { length: usize, max: usize },

    /// Sender does not resolve to an existing user
    #[error("User not found")]
    UnknownUser(UserId),
}

/// Result type for validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_user_facing() {
        assert_eq!(ValidationError::EmptyContent.to_string(), "Message cannot be empty");
        assert_eq!(
            ValidationError::ContentTooLong { length: 1001, max: 1000 }.to_string(),
            "Message exceeds maximum length of 1000 characters"
        );
        assert_eq!(ValidationError::UnknownUser(UserId::new(7)).to_string(), "User not found");
    }
}
