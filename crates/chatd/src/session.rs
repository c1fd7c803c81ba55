//! Realtime session handler.
//!
//! Transport-independent behavior of one connected client: the history
//! replay sent on connect, and the validate/persist/broadcast path for
//! `SendMessage`. The socket plumbing lives in `server::connection`.

use std::sync::Arc;

use tracing::{error, info, warn};

use chat_core::{validate_content, ConnectionId, Message, NewMessage, UserId, ValidationError};
use chat_protocol::ServerMessage;

use crate::error::{ChatError, ChatResult};
use crate::registry::{BroadcastReport, RegistryHandle};
use crate::service::{MessageService, DEFAULT_MESSAGE_LIMIT};

/// Everything a session needs from the rest of the daemon.
#[derive(Clone)]
pub struct ChatContext {
    pub service: Arc<MessageService>,
    pub registry: RegistryHandle,
}

impl ChatContext {
    pub fn new(service: Arc<MessageService>, registry: RegistryHandle) -> Self {
        Self { service, registry }
    }
}

pub struct SessionHandler {
    ctx: ChatContext,
    connection_id: ConnectionId,
}

impl SessionHandler {
    pub fn new(ctx: ChatContext, connection_id: ConnectionId) -> Self {
        Self { ctx, connection_id }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// History replayed to a newly connected client, oldest first.
    ///
    /// A store failure is logged and replayed as an empty history so the
    /// connection still comes up.
    pub async fn recent_history(&self) -> Vec<Message> {
        match self.ctx.service.get_recent_messages(DEFAULT_MESSAGE_LIMIT).await {
            Ok(messages) => messages.as_ref().clone(),
            Err(e) => {
                error!(
                    connection_id = %self.connection_id,
                    error = %e,
                    "Could not load history for new connection"
                );
                Vec::new()
            }
        }
    }

    /// Validates, persists and broadcasts one message.
    ///
    /// Nothing is stored or broadcast unless every check passes. The
    /// broadcast goes to every registered connection, the sender included.
    pub async fn send_message(&self, content: String, user_id: UserId) -> ChatResult<BroadcastReport> {
        validate_content(&content)?;

        let user = self
            .ctx
            .service
            .store()
            .find_user_by_id(user_id)
            .await?
            .ok_or(ValidationError::UnknownUser(user_id))?;

        let stored = self.ctx.service.add_message(NewMessage::now(user_id, content)).await?;

        let event = ServerMessage::receive_message(user.username, stored.content);
        let report = match self.ctx.registry.send_to_all(event).await {
            Ok(report) => report,
            Err(e) => {
                // Persisted already; only live delivery is lost
                warn!(message_id = %stored.id, error = %e, "Broadcast failed");
                BroadcastReport::default()
            }
        };

        info!(
            connection_id = %self.connection_id,
            user_id = %user_id,
            message_id = %stored.id,
            delivered = report.delivered,
            "Message broadcast"
        );
        Ok(report)
    }

    /// `send_message`, answering the caller with an `Error` event on failure.
    pub async fn handle_send_message(&self, content: String, user_id: UserId) {
        let Err(e) = self.send_message(content, user_id).await else {
            return;
        };

        match &e {
            ChatError::Validation(reason) => warn!(
                connection_id = %self.connection_id,
                user_id = %user_id,
                reason = %reason,
                "Rejected message"
            ),
            ChatError::Storage(cause) => error!(
                connection_id = %self.connection_id,
                user_id = %user_id,
                error = %cause,
                "Failed to send message"
            ),
        }

        self.reply(ServerMessage::error(e.client_message(), e.code())).await;
    }

    /// Queues an event for this connection only.
    pub async fn reply(&self, message: ServerMessage) {
        if let Err(e) = self.ctx.registry.send_to_one(self.connection_id.clone(), message).await {
            warn!(connection_id = %self.connection_id, error = %e, "Could not reply to client");
        }
    }
}
