//! Client interface for the registry actor.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`
//! - Channel errors map to `RegistryError::ChannelClosed`

use tokio::sync::{mpsc, oneshot};

use chat_core::ConnectionId;
use chat_protocol::ServerMessage;

use super::commands::{BroadcastReport, Outbound, RegistryCommand, RegistryError};

/// Cheap-to-clone handle shared by every connection task.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    pub fn new(sender: mpsc::Sender<RegistryCommand>) -> Self {
        Self { sender }
    }

    /// Adds a connection; events for it are pushed into `outbound`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ConnectionAlreadyExists` if the id is taken
    /// - `RegistryError::RegistryFull` at the connection limit
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, connection_id: ConnectionId, outbound: Outbound) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                connection_id,
                sender: outbound,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Removes a connection. Returns `false` if it was not registered or the
    /// actor is gone; safe to call more than once.
    pub async fn deregister(&self, connection_id: ConnectionId) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Deregister {
                connection_id,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Queues `message` for one connection.
    pub async fn send_to_one(&self, connection_id: ConnectionId, message: ServerMessage) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::SendToOne {
                connection_id,
                message,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Queues `message` for every registered connection.
    ///
    /// Returns once the event has been handed to each queue; it does not
    /// wait for any client to read it.
    pub async fn send_to_all(&self, message: ServerMessage) -> Result<BroadcastReport, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::SendToAll {
                message,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Number of registered connections, 0 if the actor is gone.
    pub async fn connection_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::ConnectionCount { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or(0)
    }
}
