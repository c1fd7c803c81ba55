//! Protocol message types for chat connections.

use crate::version::ProtocolVersion;
use chat_core::{ConnectionId, Message, UserId};
use serde::{Deserialize, Serialize};

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Handshake, must be the first frame on a connection
    Connect {
        /// Readable name used as a prefix for the assigned connection ID
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_name: Option<String>,
    },

    /// Post a chat message to everyone
    SendMessage {
        /// Message text (1..=1000 characters, not whitespace-only)
        content: String,
        /// Sender, as returned by login
        user_id: UserId,
    },

    /// Keepalive
    Ping {
        /// Sequence number echoed in the pong
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Creates a connect message.
    pub fn connect(client_name: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_name })
    }

    /// Creates a send message request.
    pub fn send_message(content: impl Into<String>, user_id: UserId) -> Self {
        Self::new(MessageType::SendMessage {
            content: content.into(),
            user_id,
        })
    }

    /// Creates a ping message.
    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    /// Creates a disconnect message.
    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Category of a user-facing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request was rejected (empty content, too long, unknown sender)
    Validation,
    /// The daemon failed while handling a valid request
    Internal,
    /// The frame itself was unacceptable (malformed, oversized, out of order)
    Protocol,
}

/// Messages sent from daemon to clients.
///
/// The variant names are the event names clients bind to and must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Handshake accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// ID assigned to this connection
        connection_id: ConnectionId,
    },

    /// Handshake refused (version mismatch)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Recent history, sent only to a newly connected client
    ReceiveRecentMessages {
        /// Oldest first
        messages: Vec<Message>,
    },

    /// A new chat message, sent to every connected client including the sender
    ReceiveMessage {
        sender_username: String,
        content: String,
    },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Rejected operation or failure, sent only to the originating client
    Error {
        /// Error message
        message: String,
        /// Error category
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

impl ServerMessage {
    /// Creates a connected response.
    pub fn connected(connection_id: ConnectionId) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            connection_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    /// Creates the history replay for a new connection.
    pub fn recent_messages(messages: Vec<Message>) -> Self {
        Self::ReceiveRecentMessages { messages }
    }

    /// Creates a chat broadcast.
    pub fn receive_message(sender_username: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ReceiveMessage {
            sender_username: sender_username.into(),
            content: content.into(),
        }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response with a category.
    pub fn error(message: impl Into<String>, code: ErrorCode) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(code),
        }
    }

    /// Event name as it appears in the `type` field.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "Connected",
            Self::Rejected { .. } => "Rejected",
            Self::ReceiveRecentMessages { .. } => "ReceiveRecentMessages",
            Self::ReceiveMessage { .. } => "ReceiveMessage",
            Self::Pong { .. } => "Pong",
            Self::Error { .. } => "Error",
        }
    }
}
