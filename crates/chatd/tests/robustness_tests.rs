//! Robustness tests for the chat socket server.
//!
//! These verify the server survives bad input and connection churn:
//! - Malformed frames are answered and the connection continues
//! - Oversized frames close the offending connection only
//! - Rapid connect/disconnect cycles leave the registry clean
//! - Many concurrent clients all receive a broadcast
//! - Messages from one sender arrive in send order everywhere

mod common;

use chat_protocol::{ClientMessage, ErrorCode, ServerMessage, MAX_FRAME_SIZE};
use common::TestServer;

fn assert_protocol_error(msg: &ServerMessage) {
    match msg {
        ServerMessage::Error { code, .. } => assert_eq!(*code, Some(ErrorCode::Protocol)),
        other => panic!("expected protocol Error, got {other:?}"),
    }
}

// ============================================================================
// Malformed input
// ============================================================================

#[tokio::test]
async fn test_malformed_frames_do_not_close_connection() {
    let server = TestServer::spawn().await;
    let (mut client, _) = server.join("fuzzer").await;

    for garbage in [
        "{not json",
        "",
        r#"{"protocol_version":{"major":1,"minor":0},"type":"teleport"}"#,
        r#"{"type":"ping","seq":1}"#,
        "[1, 2, 3]",
    ] {
        client.send_raw(garbage).await;
        assert_protocol_error(&client.recv().await);
    }

    // Still usable
    client.send(&ClientMessage::ping(99)).await;
    assert_eq!(client.recv().await, ServerMessage::pong(99));
    assert_eq!(server.registry.connection_count().await, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_is_not_broadcast() {
    let server = TestServer::spawn().await;
    let (mut bad, _) = server.join("bad").await;
    let (mut good, _) = server.join("good").await;
    server.wait_for_connections(2).await;

    bad.send_raw("{{{{").await;
    assert_protocol_error(&bad.recv().await);
    good.expect_silence().await;

    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let server = TestServer::spawn().await;
    let alice = server.create_user("alice").await;
    let (mut big, _) = server.join("big").await;
    let (mut bystander, _) = server.join("bystander").await;
    server.wait_for_connections(2).await;

    big.send_raw(&"x".repeat(MAX_FRAME_SIZE + 1024)).await;

    // The error frame can be lost to a reset when unread input remains
    if let Some(msg) = big.try_recv().await {
        assert_protocol_error(&msg);
    }
    assert!(big.is_closed().await);
    server.wait_for_connections(1).await;

    // Other clients are unaffected
    bystander
        .send(&ClientMessage::send_message("still here", alice.id))
        .await;
    assert_eq!(
        bystander.recv().await,
        ServerMessage::receive_message("alice", "still here")
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_errors_do_not_interrupt_session() {
    let server = TestServer::spawn().await;
    let alice = server.create_user("alice").await;
    let (mut client, _) = server.join("mixed").await;

    client.send(&ClientMessage::send_message("", alice.id)).await;
    assert!(matches!(client.recv().await, ServerMessage::Error { .. }));

    client.send_raw("nonsense").await;
    assert_protocol_error(&client.recv().await);

    client.send(&ClientMessage::send_message("recovered", alice.id)).await;
    assert_eq!(
        client.recv().await,
        ServerMessage::receive_message("alice", "recovered")
    );

    server.shutdown().await;
}

// ============================================================================
// Connection churn
// ============================================================================

#[tokio::test]
async fn test_rapid_connect_disconnect() {
    let server = TestServer::spawn().await;

    for i in 0..25 {
        let (mut client, _) = server.join(&format!("churn{i}")).await;
        if i % 2 == 0 {
            client.send(&ClientMessage::disconnect()).await;
        }
        drop(client);
    }

    server.wait_for_connections(0).await;

    // Server still accepts new clients
    let (mut client, _) = server.join("after").await;
    client.send(&ClientMessage::ping(1)).await;
    assert_eq!(client.recv().await, ServerMessage::pong(1));

    server.shutdown().await;
}

#[tokio::test]
async fn test_connect_without_handshake_then_drop() {
    let server = TestServer::spawn().await;

    for _ in 0..10 {
        drop(server.connect().await);
    }

    let (_client, _) = server.join("real").await;
    server.wait_for_connections(1).await;

    server.shutdown().await;
}

// ============================================================================
// Fan-out under load
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_clients_receive_broadcast() {
    const CLIENTS: usize = 30;

    let server = TestServer::spawn().await;
    let alice = server.create_user("alice").await;

    let mut clients = Vec::with_capacity(CLIENTS);
    for i in 0..CLIENTS {
        let (client, _) = server.join(&format!("c{i}")).await;
        clients.push(client);
    }
    server.wait_for_connections(CLIENTS).await;

    clients[0]
        .send(&ClientMessage::send_message("to everyone", alice.id))
        .await;

    let expected = ServerMessage::receive_message("alice", "to everyone");
    let receivers = clients.into_iter().map(|mut client| {
        let expected = expected.clone();
        tokio::spawn(async move {
            assert_eq!(client.recv().await, expected);
        })
    });
    for handle in receivers.collect::<Vec<_>>() {
        handle.await.unwrap();
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_per_sender_order_is_preserved() {
    const COUNT: usize = 50;

    let server = TestServer::spawn().await;
    let alice = server.create_user("alice").await;
    let (mut sender, _) = server.join("sender").await;
    let (mut watcher, _) = server.join("watcher").await;
    server.wait_for_connections(2).await;

    for i in 0..COUNT {
        sender
            .send(&ClientMessage::send_message(format!("n{i}"), alice.id))
            .await;
    }

    for client in [&mut sender, &mut watcher] {
        for i in 0..COUNT {
            assert_eq!(
                client.recv().await,
                ServerMessage::receive_message("alice", format!("n{i}"))
            );
        }
    }

    server.shutdown().await;
}
