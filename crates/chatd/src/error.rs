//! Error taxonomy shared by the message path.
//!
//! Every failure on the send path is classified where it happens, so the
//! session layer can decide what the client sees from the variant alone.

use chat_core::ValidationError;
use chat_protocol::ErrorCode;
use thiserror::Error;

use crate::store::StoreError;

/// Generic text sent to clients for any non-validation failure.
pub const SEND_FAILED_MESSAGE: &str = "An error occurred while sending the message";

/// Errors on the message path.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Rejected input; the display text is safe to show the client
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Persistence failed; details stay in the logs
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ChatError {
    /// Wire error category.
    pub fn code(&self) -> ErrorCode {
        match self {
            ChatError::Validation(_) => ErrorCode::Validation,
            ChatError::Storage(_) => ErrorCode::Internal,
        }
    }

    /// Text for the originating client. Storage detail never leaks.
    pub fn client_message(&self) -> String {
        match self {
            ChatError::Validation(e) => e.to_string(),
            ChatError::Storage(_) => SEND_FAILED_MESSAGE.to_string(),
        }
    }
}

/// Result type for the message path.
pub type ChatResult<T> = Result<T, ChatError>;
