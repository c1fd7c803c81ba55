//! Shared harness for the socket-level integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`; the panic-free behavior of
//! production code is checked through assertions.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_core::{NewMessage, User};
use chat_protocol::{ClientMessage, ServerMessage};
use chatd::registry::{spawn_registry, RegistryHandle};
use chatd::server::ChatServer;
use chatd::service::{MessageCache, MessageService, DEFAULT_CACHE_DURATION};
use chatd::session::ChatContext;
use chatd::store::{ChatStore, MemoryStore};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for any single expected frame
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a client must stay silent to count as "received nothing"
pub const QUIET_PERIOD: Duration = Duration::from_millis(150);

/// Interval between registry polls
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum time to wait for the registry to reach a connection count
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Test Server
// ============================================================================

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub service: Arc<MessageService>,
    pub registry: RegistryHandle,
    cancel_token: CancellationToken,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        Self::spawn_with_max_connections(64).await
    }

    pub async fn spawn_with_max_connections(max_connections: usize) -> Self {
        let store = Arc::new(MemoryStore::new());
        let service = Arc::new(MessageService::new(
            store.clone(),
            Arc::new(MessageCache::new()),
            DEFAULT_CACHE_DURATION,
        ));
        let registry = spawn_registry(max_connections);
        let cancel_token = CancellationToken::new();

        let ctx = ChatContext::new(service.clone(), registry.clone());
        let server = ChatServer::bind("127.0.0.1:0".parse().unwrap(), ctx, cancel_token.clone())
            .await
            .expect("bind test server");
        let addr = server.local_addr().expect("local addr");

        let task = tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            addr,
            store,
            service,
            registry,
            cancel_token,
            task,
        }
    }

    pub async fn create_user(&self, username: &str) -> User {
        self.store.create_user(username).await.expect("create user")
    }

    /// Stores a message through the service, as a sender would.
    pub async fn seed_message(&self, user: &User, content: &str) {
        self.service
            .add_message(NewMessage::now(user.id, content))
            .await
            .expect("seed message");
    }

    /// Raw TCP connection, no handshake.
    pub async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.addr).await.expect("connect to server");
        TestClient::new(stream)
    }

    /// Connects and completes the handshake. Returns the client and the
    /// history replayed to it.
    pub async fn join(&self, name: &str) -> (TestClient, ServerMessage) {
        let mut client = self.connect().await;
        client.send(&ClientMessage::connect(Some(name.to_string()))).await;

        let connected = client.recv().await;
        assert!(
            matches!(connected, ServerMessage::Connected { .. }),
            "expected Connected, got {connected:?}"
        );
        let history = client.recv().await;
        assert!(
            matches!(history, ServerMessage::ReceiveRecentMessages { .. }),
            "expected ReceiveRecentMessages, got {history:?}"
        );
        (client, history)
    }

    /// Waits until the registry holds exactly `expected` connections.
    pub async fn wait_for_connections(&self, expected: usize) {
        let start = tokio::time::Instant::now();
        loop {
            let count = self.registry.connection_count().await;
            if count == expected {
                return;
            }
            assert!(
                start.elapsed() < SETTLE_TIMEOUT,
                "registry stuck at {count} connections, expected {expected}"
            );
            sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn shutdown(self) {
        self.cancel_token.cancel();
        let _ = timeout(Duration::from_secs(6), self.task).await;
    }
}

// ============================================================================
// Test Client
// ============================================================================

pub struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    pub async fn send(&mut self, msg: &ClientMessage) {
        let json = serde_json::to_string(msg).unwrap();
        self.send_raw(&json).await;
    }

    /// Writes `line` followed by a newline.
    pub async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    pub async fn recv(&mut self) -> ServerMessage {
        let mut line = String::new();
        let read = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a frame")
            .expect("read frame");
        assert!(read > 0, "connection closed while waiting for a frame");
        serde_json::from_str(&line).unwrap()
    }

    /// Next frame, or `None` if the connection ended first (EOF or reset).
    pub async fn try_recv(&mut self) -> Option<ServerMessage> {
        let mut line = String::new();
        match timeout(RECV_TIMEOUT, self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) | Ok(Err(_)) => None,
            Ok(Ok(_)) => Some(serde_json::from_str(&line).unwrap()),
            Err(_) => panic!("timed out waiting for a frame or close"),
        }
    }

    /// Asserts that nothing arrives within the quiet period.
    pub async fn expect_silence(&mut self) {
        let mut line = String::new();
        if let Ok(result) = timeout(QUIET_PERIOD, self.reader.read_line(&mut line)).await {
            let read = result.unwrap_or(0);
            assert_eq!(read, 0, "unexpected frame: {line}");
        }
    }

    /// Whether the server closed the connection (EOF within the timeout).
    pub async fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        loop {
            line.clear();
            match timeout(RECV_TIMEOUT, self.reader.read_line(&mut line)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return true,
                Ok(Ok(_)) => continue,
                Err(_) => return false,
            }
        }
    }
}
