//! Registry actor commands, errors and reports.
//!
//! Every command that expects an answer carries a oneshot sender; the actor
//! ignores a dropped receiver.

use chat_core::ConnectionId;
use chat_protocol::ServerMessage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Outbound queue of one connection.
pub type Outbound = mpsc::Sender<ServerMessage>;

// ============================================================================
// Registry Commands
// ============================================================================

#[derive(Debug)]
pub enum RegistryCommand {
    /// Add a connection and its outbound queue.
    ///
    /// # Errors
    /// - `RegistryError::ConnectionAlreadyExists` if the id is taken
    /// - `RegistryError::RegistryFull` at the connection limit
    Register {
        connection_id: ConnectionId,
        sender: Outbound,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a connection. Answers whether it was present.
    Deregister {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Queue an event for one connection.
    SendToOne {
        connection_id: ConnectionId,
        message: ServerMessage,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Queue an event for every registered connection.
    SendToAll {
        message: ServerMessage,
        respond_to: oneshot::Sender<BroadcastReport>,
    },

    ConnectionCount {
        respond_to: oneshot::Sender<usize>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry is full (max: {max} connections)")]
    RegistryFull { max: usize },

    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    #[error("connection already exists: {0}")]
    ConnectionAlreadyExists(ConnectionId),

    /// The connection's outbound queue is full; the event was dropped.
    #[error("outbound queue full: {0}")]
    QueueFull(ConnectionId),

    /// The actor has shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Broadcast Report
// ============================================================================

/// Outcome of one `SendToAll`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the event was queued for
    pub delivered: usize,
    /// Connections whose queue was full
    pub dropped: usize,
    /// Connections found closed and removed
    pub pruned: usize,
}

impl BroadcastReport {
    /// Connections the broadcast was attempted on.
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped + self.pruned
    }
}
