//! Connection handler for individual clients.
//!
//! Lifecycle of one socket:
//! 1. Handshake: first frame must be `Connect` with a compatible version
//! 2. Register the connection's outbound queue with the registry
//! 3. Write `Connected` and the `ReceiveRecentMessages` replay directly
//! 4. Hand the write half to a writer task that drains the queue
//! 5. Read frames until EOF, `Disconnect`, idle timeout or shutdown
//! 6. Deregister and let the writer flush what is queued
//!
//! Frames from one client are handled strictly in arrival order.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` outside tests
//! - Malformed frames are answered with a protocol error; the connection stays up
//! - I/O failures end the connection and are logged

use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chat_core::ConnectionId;
use chat_protocol::{
    decode_frame, encode_frame, ClientMessage, ErrorCode, FrameError, MessageType, ProtocolVersion,
    ServerMessage, MAX_FRAME_SIZE,
};

use crate::registry::RegistryError;
use crate::session::{ChatContext, SessionHandler};

/// Events queued per connection before broadcasts start skipping it.
pub const OUTBOUND_QUEUE_SIZE: usize = 256;

/// Idle connections are closed after this long without a frame.
pub const READ_TIMEOUT: Duration = Duration::from_secs(600);

/// A single frame write must finish within this.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for the first frame.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large (max: {max} bytes)")]
    MessageTooLarge { max: usize },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ConnectionError {
    /// Whether the connection can keep reading after this error.
    fn is_recoverable(&self) -> bool {
        matches!(self, ConnectionError::Frame(FrameError::Malformed(_)))
    }
}

/// Drives one client socket.
pub struct ConnectionHandler {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: BufWriter<OwnedWriteHalf>,
    ctx: ChatContext,
    connection_number: u64,
    shutdown: CancellationToken,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        ctx: ChatContext,
        connection_number: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_FRAME_SIZE)),
            writer: BufWriter::new(writer),
            ctx,
            connection_number,
            shutdown,
        }
    }

    /// Runs the connection to completion. Returns the assigned id if the
    /// handshake succeeded.
    pub async fn run(mut self) -> Option<ConnectionId> {
        debug!(connection = self.connection_number, "New client connected");

        let connection_id = match self.handle_handshake().await {
            Ok(id) => id,
            Err(e) => {
                warn!(connection = self.connection_number, error = %e, "Handshake failed");
                return None;
            }
        };

        let (outbound, queue) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        if let Err(e) = self.ctx.registry.register(connection_id.clone(), outbound).await {
            warn!(connection_id = %connection_id, error = %e, "Could not register connection");
            let reason = match e {
                RegistryError::RegistryFull { .. } => "Server is at connection capacity",
                _ => "Server is shutting down",
            };
            let _ = write_frame(&mut self.writer, &ServerMessage::error(reason, ErrorCode::Protocol)).await;
            return None;
        }

        let session = SessionHandler::new(self.ctx.clone(), connection_id.clone());
        if let Err(e) = self.greet(&session).await {
            debug!(connection_id = %connection_id, error = %e, "Failed to greet client");
            self.ctx.registry.deregister(connection_id.clone()).await;
            return Some(connection_id);
        }
        info!(connection_id = %connection_id, "Client handshake completed");

        let Self {
            mut reader,
            writer,
            ctx,
            shutdown,
            ..
        } = self;
        let closed = CancellationToken::new();
        let writer_task = spawn_writer(writer, queue, connection_id.clone(), closed.clone());

        if let Err(e) = process_messages(&mut reader, &session, &shutdown, &closed).await {
            debug!(connection_id = %connection_id, error = %e, "Connection closed");
        }

        // Removing the registry's sender closes the queue, which ends the writer
        ctx.registry.deregister(connection_id.clone()).await;
        let _ = writer_task.await;

        info!(connection_id = %connection_id, "Client disconnected");
        Some(connection_id)
    }

    async fn handle_handshake(&mut self) -> Result<ConnectionId, ConnectionError> {
        let msg = match timeout(HANDSHAKE_TIMEOUT, read_message(&mut self.reader)).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        let client_version = msg.protocol_version;
        if !client_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            write_frame(
                &mut self.writer,
                &ServerMessage::rejected(format!(
                    "Protocol version {} not compatible with server version {}",
                    client_version,
                    ProtocolVersion::CURRENT
                )),
            )
            .await?;
            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_name } => Ok(ConnectionId::assign(
                self.connection_number,
                client_name.as_deref(),
            )),
            other => {
                write_frame(
                    &mut self.writer,
                    &ServerMessage::error("Expected Connect message for handshake", ErrorCode::Protocol),
                )
                .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    /// Writes `Connected` and the history replay ahead of any queued
    /// broadcast, so the replay is always the first chat payload.
    async fn greet(&mut self, session: &SessionHandler) -> Result<(), ConnectionError> {
        write_frame(&mut self.writer, &ServerMessage::connected(session.connection_id().clone())).await?;

        let history = session.recent_history().await;
        debug!(
            connection_id = %session.connection_id(),
            count = history.len(),
            "Replaying recent messages"
        );
        write_frame(&mut self.writer, &ServerMessage::recent_messages(history)).await
    }
}

/// Reads frames until the client leaves or the connection must close.
async fn process_messages(
    reader: &mut FramedRead<OwnedReadHalf, LinesCodec>,
    session: &SessionHandler,
    shutdown: &CancellationToken,
    closed: &CancellationToken,
) -> Result<(), ConnectionError> {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(connection_id = %session.connection_id(), "Server shutting down, closing connection");
                return Ok(());
            }
            _ = closed.cancelled() => {
                return Err(ConnectionError::Io("writer stopped".into()));
            }
            next = timeout(READ_TIMEOUT, read_message(reader)) => next,
        };

        let msg = match next {
            Ok(Ok(msg)) => msg,
            Ok(Err(ConnectionError::Eof)) => {
                debug!(connection_id = %session.connection_id(), "Client sent EOF");
                return Ok(());
            }
            Ok(Err(e)) if e.is_recoverable() => {
                warn!(connection_id = %session.connection_id(), error = %e, "Ignoring bad frame");
                session
                    .reply(ServerMessage::error(e.to_string(), ErrorCode::Protocol))
                    .await;
                continue;
            }
            Ok(Err(e)) => {
                if matches!(e, ConnectionError::MessageTooLarge { .. }) {
                    session
                        .reply(ServerMessage::error(e.to_string(), ErrorCode::Protocol))
                        .await;
                }
                return Err(e);
            }
            Err(_) => {
                debug!(connection_id = %session.connection_id(), "Connection timed out");
                return Err(ConnectionError::Timeout);
            }
        };

        match msg.message {
            MessageType::Connect { .. } => {
                session
                    .reply(ServerMessage::error("Already connected", ErrorCode::Protocol))
                    .await;
            }
            MessageType::SendMessage { content, user_id } => {
                session.handle_send_message(content, user_id).await;
            }
            MessageType::Ping { seq } => {
                session.reply(ServerMessage::pong(seq)).await;
            }
            MessageType::Disconnect => {
                debug!(connection_id = %session.connection_id(), "Client requested disconnect");
                return Ok(());
            }
        }
    }
}

async fn read_message(
    reader: &mut FramedRead<OwnedReadHalf, LinesCodec>,
) -> Result<ClientMessage, ConnectionError> {
    match reader.next().await {
        None => Err(ConnectionError::Eof),
        Some(Err(LinesCodecError::MaxLineLengthExceeded)) => Err(ConnectionError::MessageTooLarge {
            max: MAX_FRAME_SIZE,
        }),
        Some(Err(LinesCodecError::Io(e))) => Err(ConnectionError::Io(e.to_string())),
        Some(Ok(line)) => Ok(decode_frame(&line)?),
    }
}

async fn write_frame(
    writer: &mut BufWriter<OwnedWriteHalf>,
    msg: &ServerMessage,
) -> Result<(), ConnectionError> {
    let frame = encode_frame(msg)?;

    match timeout(WRITE_TIMEOUT, async {
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
        Ok::<(), std::io::Error>(())
    })
    .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout),
    }
}

/// Drains the outbound queue onto the socket until the queue closes or a
/// write fails. A failed write cancels `closed` so the reader stops too.
fn spawn_writer(
    mut writer: BufWriter<OwnedWriteHalf>,
    mut queue: mpsc::Receiver<ServerMessage>,
    connection_id: ConnectionId,
    closed: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = queue.recv().await {
            if let Err(e) = write_frame(&mut writer, &msg).await {
                warn!(
                    connection_id = %connection_id,
                    event = msg.event_name(),
                    error = %e,
                    "Write failed, closing connection"
                );
                closed.cancel();
                return;
            }
        }

        let _ = writer.shutdown().await;
        debug!(connection_id = %connection_id, "Writer finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::VersionMismatch {
            client: ProtocolVersion::new(2, 0),
            server: ProtocolVersion::new(1, 0),
        };
        assert!(err.to_string().contains("2.0"));
        assert!(err.to_string().contains("1.0"));

        let err = ConnectionError::MessageTooLarge { max: MAX_FRAME_SIZE };
        assert!(err.to_string().contains(&MAX_FRAME_SIZE.to_string()));
    }

    #[test]
    fn test_only_malformed_frames_are_recoverable() {
        let malformed = decode_frame::<ClientMessage>("{not json").unwrap_err();
        assert!(ConnectionError::Frame(malformed).is_recoverable());
        assert!(!ConnectionError::Eof.is_recoverable());
        assert!(!ConnectionError::MessageTooLarge { max: 1 }.is_recoverable());
        assert!(!ConnectionError::Timeout.is_recoverable());
    }
}
