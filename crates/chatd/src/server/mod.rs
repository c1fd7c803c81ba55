//! TCP socket server for the realtime chat surface.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   ChatServer    │
//! │  TcpListener    │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐  register / send_to_all  ┌─────────────────┐
//! │ConnectionHandler│─────────────────────────▶│ RegistryHandle  │
//! │  (per client)   │                          └────────┬────────┘
//! └───────┬─────────┘                                   │ try_send
//!         │ SendMessage                                 ▼
//!         ▼                                    ┌─────────────────┐
//! ┌─────────────────┐                          │ per-connection  │
//! │ MessageService  │                          │ writer tasks    │
//! └─────────────────┘                          └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()` outside tests
//! - Accept errors are logged and the loop keeps going

mod connection;

pub use connection::{
    ConnectionError, ConnectionHandler, HANDSHAKE_TIMEOUT, OUTBOUND_QUEUE_SIZE, READ_TIMEOUT,
    WRITE_TIMEOUT,
};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::session::ChatContext;

/// How long `run` waits for open connections to wind down on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Accepts chat clients until cancelled.
pub struct ChatServer {
    listener: TcpListener,
    ctx: ChatContext,
    cancel_token: CancellationToken,
    connection_counter: AtomicU64,
}

impl ChatServer {
    /// Binds the listener. Use port 0 to let the OS pick one.
    pub async fn bind(
        addr: SocketAddr,
        ctx: ChatContext,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
            addr,
            error: e.to_string(),
        })?;

        Ok(Self {
            listener,
            ctx,
            cancel_token,
            connection_counter: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    /// Runs the accept loop. Returns after the cancellation token fires and
    /// open connections have closed (or the grace period ran out).
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Chat server listening");

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            debug!(peer = %peer, connection = conn_num, "Accepted connection");
                            self.spawn_connection(&mut connections, stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        let open = connections.len();
        if open > 0 {
            debug!(open, "Waiting for connections to close");
            let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
                while connections.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!(remaining = connections.len(), "Aborting connections after grace period");
                connections.abort_all();
            }
        }

        info!("Chat server stopped");
        Ok(())
    }

    fn spawn_connection(&self, connections: &mut JoinSet<()>, stream: TcpStream, connection_number: u64) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.ctx.clone(),
            connection_number,
            self.cancel_token.clone(),
        );

        connections.spawn(async move {
            handler.run().await;
        });
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Failed to read local address: {0}")]
    LocalAddr(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:7878".parse().unwrap(),
            error: "address in use".to_string(),
        };
        assert!(err.to_string().contains("127.0.0.1:7878"));
        assert!(err.to_string().contains("address in use"));
    }
}
