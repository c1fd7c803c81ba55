//! Registry actor - owns the set of live connections.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` outside tests
//! - Responses to dropped receivers are ignored
//! - Delivery never awaits: events are handed to connection queues with
//!   `try_send`, so one slow client cannot hold up the actor

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use chat_core::ConnectionId;
use chat_protocol::ServerMessage;

use super::commands::{BroadcastReport, Outbound, RegistryCommand, RegistryError};

/// Default connection limit.
pub const MAX_CONNECTIONS: usize = 1024;

// ============================================================================
// Registry Actor
// ============================================================================

/// Single owner of the connection map.
///
/// Commands are processed one at a time, so two broadcasts are queued to
/// every connection in the same relative order.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,
    connections: HashMap<ConnectionId, Outbound>,
    max_connections: usize,
}

impl RegistryActor {
    pub fn new(receiver: mpsc::Receiver<RegistryCommand>, max_connections: usize) -> Self {
        Self {
            receiver,
            connections: HashMap::new(),
            max_connections,
        }
    }

    /// Processes commands until every handle is dropped.
    pub async fn run(mut self) {
        info!(max_connections = self.max_connections, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            connections = self.connections.len(),
            "Registry actor stopped"
        );
    }

    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                connection_id,
                sender,
                respond_to,
            } => {
                let result = self.handle_register(connection_id, sender);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Deregister {
                connection_id,
                respond_to,
            } => {
                let removed = self.handle_deregister(&connection_id);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::SendToOne {
                connection_id,
                message,
                respond_to,
            } => {
                let result = self.handle_send_to_one(connection_id, message);
                let _ = respond_to.send(result);
            }
            RegistryCommand::SendToAll {
                message,
                respond_to,
            } => {
                let report = self.handle_send_to_all(message);
                let _ = respond_to.send(report);
            }
            RegistryCommand::ConnectionCount { respond_to } => {
                let _ = respond_to.send(self.connections.len());
            }
        }
    }

    fn handle_register(&mut self, connection_id: ConnectionId, sender: Outbound) -> Result<(), RegistryError> {
        if self.connections.contains_key(&connection_id) {
            return Err(RegistryError::ConnectionAlreadyExists(connection_id));
        }

        if self.connections.len() >= self.max_connections {
            warn!(
                connection_id = %connection_id,
                max = self.max_connections,
                "Registry full, refusing connection"
            );
            return Err(RegistryError::RegistryFull {
                max: self.max_connections,
            });
        }

        debug!(connection_id = %connection_id, "Connection registered");
        self.connections.insert(connection_id, sender);
        Ok(())
    }

    fn handle_deregister(&mut self, connection_id: &ConnectionId) -> bool {
        let removed = self.connections.remove(connection_id).is_some();
        if removed {
            debug!(connection_id = %connection_id, "Connection deregistered");
        }
        removed
    }

    fn handle_send_to_one(&mut self, connection_id: ConnectionId, message: ServerMessage) -> Result<(), RegistryError> {
        let Some(sender) = self.connections.get(&connection_id) else {
            return Err(RegistryError::ConnectionNotFound(connection_id));
        };

        match sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message)) => {
                warn!(
                    connection_id = %connection_id,
                    event = message.event_name(),
                    "Outbound queue full, dropping event"
                );
                Err(RegistryError::QueueFull(connection_id))
            }
            Err(TrySendError::Closed(_)) => {
                self.connections.remove(&connection_id);
                debug!(connection_id = %connection_id, "Pruned closed connection");
                Err(RegistryError::ConnectionNotFound(connection_id))
            }
        }
    }

    fn handle_send_to_all(&mut self, message: ServerMessage) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        for (connection_id, sender) in &self.connections {
            match sender.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    warn!(
                        connection_id = %connection_id,
                        event = message.event_name(),
                        "Outbound queue full, client misses broadcast"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(connection_id.clone()),
            }
        }

        for connection_id in closed {
            self.connections.remove(&connection_id);
            report.pruned += 1;
            debug!(connection_id = %connection_id, "Pruned closed connection");
        }

        debug!(
            event = message.event_name(),
            delivered = report.delivered,
            dropped = report.dropped,
            pruned = report.pruned,
            "Broadcast queued"
        );
        report
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
