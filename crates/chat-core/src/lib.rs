//! Chat Core - Shared types for the chat daemon
//!
//! This crate provides the domain types shared between the wire
//! protocol (chat-protocol) and the daemon (chatd).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod connection;
pub mod error;
pub mod message;
pub mod user;

// Re-exports for convenience
pub use connection::ConnectionId;
pub use error::{ValidationError, ValidationResult};
pub use message::{validate_content, Message, MessageId, NewMessage, MAX_MESSAGE_LENGTH};
pub use user::{User, UserId};
