//! End-to-end tests against a real listener using a `tokio-tungstenite` client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_core::{ChannelId, ClientMessage, ServerEvent, UserId, close, decode_server_event};
use parley_server::{
    ChannelDirectory, Collaborators, InMemoryMessageStore, ParleyServer, ServerConfig,
    StaticSessions,
};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestHub {
    server: Arc<ParleyServer>,
    store: Arc<InMemoryMessageStore>,
    base: String,
}

async fn boot(config: ServerConfig) -> TestHub {
    let directory = ChannelDirectory::new();
    for ch in [1, 2, 42] {
        directory.add_public(ChannelId::new(ch));
    }
    directory.add_private(ChannelId::new(7), [UserId::new(1)]);
    let store = Arc::new(InMemoryMessageStore::new());
    let sessions = StaticSessions::new()
        .with_token("alice", UserId::new(1))
        .with_token("bob", UserId::new(2))
        .with_token("carol", UserId::new(3));

    let server = Arc::new(ParleyServer::new(
        config,
        Collaborators {
            authorizer: Arc::new(directory),
            store: store.clone(),
            sessions: Arc::new(sessions),
        },
    ));
    let (addr, _handle) = server.listen().await.unwrap();
    TestHub {
        server,
        store,
        base: format!("ws://{addr}/ws"),
    }
}

async fn boot_default() -> TestHub {
    boot(ServerConfig::default()).await
}

/// Connect with `?token=` and consume the `connected` ack.
async fn login(hub: &TestHub, token: &str) -> (WsStream, UserId) {
    let (mut ws, _) = connect_async(format!("{}?token={token}", hub.base))
        .await
        .unwrap();
    match read_event(&mut ws).await {
        ServerEvent::Connected { user_id, .. } => (ws, user_id),
        other => panic!("expected connected, got {other:?}"),
    }
}

async fn send(ws: &mut WsStream, msg: &ClientMessage) {
    ws.send(Message::text(msg.to_json().unwrap())).await.unwrap();
}

/// Next application event, skipping transport pings.
async fn read_event(ws: &mut WsStream) -> ServerEvent {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("ws error");
        match msg {
            Message::Text(text) => return decode_server_event(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Close code of the next close frame.
async fn read_close_code(ws: &mut WsStream) -> u16 {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended")
            .expect("ws error");
        match msg {
            Message::Close(Some(frame)) => return u16::from(frame.code),
            Message::Close(None) => panic!("close without code"),
            _ => {}
        }
    }
}

async fn subscribe(ws: &mut WsStream, channel: i64) {
    let channel_id = ChannelId::new(channel);
    send(ws, &ClientMessage::Subscribe { channel_id }).await;
    assert_eq!(read_event(ws).await, ServerEvent::Subscribed { channel_id });
}

/// Round-trip a ping so every earlier event has been flushed.
async fn expect_quiet(ws: &mut WsStream) {
    send(ws, &ClientMessage::Ping).await;
    assert_eq!(read_event(ws).await, ServerEvent::Pong);
}

#[tokio::test]
async fn connect_ack_carries_identity() {
    let hub = boot_default().await;
    let (_ws, user) = login(&hub, "alice").await;
    assert_eq!(user, UserId::new(1));
    assert_eq!(hub.server.hub().connection_count(), 1);
}

#[tokio::test]
async fn bearer_header_authenticates() {
    let hub = boot_default().await;
    let mut request = hub.base.as_str().into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("authorization", HeaderValue::from_static("Bearer bob"));
    let (mut ws, _) = connect_async(request).await.unwrap();
    assert!(matches!(
        read_event(&mut ws).await,
        ServerEvent::Connected { user_id, .. } if user_id == UserId::new(2)
    ));
}

#[tokio::test]
async fn subscriber_receives_exactly_one_message() {
    let hub = boot_default().await;
    let (mut alice, _) = login(&hub, "alice").await;
    let (mut bob, _) = login(&hub, "bob").await;
    subscribe(&mut alice, 42).await;

    send(&mut bob, &ClientMessage::chat(ChannelId::new(42), "hi")).await;

    match read_event(&mut alice).await {
        ServerEvent::Message {
            channel_id,
            message,
        } => {
            assert_eq!(channel_id, ChannelId::new(42));
            assert_eq!(message.content, "hi");
            assert_eq!(message.user_id, UserId::new(2));
        }
        other => panic!("expected message, got {other:?}"),
    }
    expect_quiet(&mut alice).await;
    assert_eq!(hub.store.messages(ChannelId::new(42)).len(), 1);
}

#[tokio::test]
async fn other_channels_stay_silent() {
    let hub = boot_default().await;
    let (mut alice, _) = login(&hub, "alice").await;
    let (mut bob, _) = login(&hub, "bob").await;
    subscribe(&mut alice, 1).await;
    subscribe(&mut bob, 2).await;

    send(&mut bob, &ClientMessage::chat(ChannelId::new(2), "elsewhere")).await;
    assert!(matches!(read_event(&mut bob).await, ServerEvent::Message { .. }));

    expect_quiet(&mut alice).await;
}

#[tokio::test]
async fn missing_credential_closes_with_policy_violation() {
    let hub = boot_default().await;
    let (mut ws, _) = connect_async(hub.base.as_str()).await.unwrap();
    assert_eq!(read_close_code(&mut ws).await, close::POLICY_VIOLATION);
    assert_eq!(hub.server.hub().connection_count(), 0);
}

#[tokio::test]
async fn unknown_credential_closes_with_policy_violation() {
    let hub = boot_default().await;
    let (mut ws, _) = connect_async(format!("{}?token=mallory", hub.base))
        .await
        .unwrap();
    assert_eq!(read_close_code(&mut ws).await, close::POLICY_VIOLATION);
}

#[tokio::test]
async fn private_channel_denied_but_connection_survives() {
    let hub = boot_default().await;
    let (mut bob, _) = login(&hub, "bob").await;

    send(
        &mut bob,
        &ClientMessage::Subscribe {
            channel_id: ChannelId::new(7),
        },
    )
    .await;
    assert!(matches!(
        read_event(&mut bob).await,
        ServerEvent::Error { channel_id: Some(ch), .. } if ch == ChannelId::new(7)
    ));

    send(&mut bob, &ClientMessage::chat(ChannelId::new(7), "let me in")).await;
    assert!(matches!(read_event(&mut bob).await, ServerEvent::Error { .. }));
    assert!(hub.store.is_empty());
    expect_quiet(&mut bob).await;
}

#[tokio::test]
async fn malformed_frame_gets_error_and_stays_open() {
    let hub = boot_default().await;
    let (mut ws, _) = login(&hub, "carol").await;
    ws.send(Message::text("{\"type\":\"subscribe\"}")).await.unwrap();
    assert!(matches!(
        read_event(&mut ws).await,
        ServerEvent::Error { message, .. } if message.contains("subscribe")
    ));
    expect_quiet(&mut ws).await;
}

#[tokio::test]
async fn typing_reaches_channel_with_sender() {
    let hub = boot_default().await;
    let (mut alice, _) = login(&hub, "alice").await;
    let (mut bob, _) = login(&hub, "bob").await;
    subscribe(&mut alice, 1).await;
    subscribe(&mut bob, 1).await;

    send(
        &mut bob,
        &ClientMessage::Typing {
            channel_id: ChannelId::new(1),
        },
    )
    .await;
    assert_eq!(
        read_event(&mut alice).await,
        ServerEvent::Typing {
            channel_id: ChannelId::new(1),
            user_id: UserId::new(2)
        }
    );
}

#[tokio::test]
async fn dead_socket_does_not_block_other_subscribers() {
    let hub = boot_default().await;
    let (mut doomed, _) = login(&hub, "alice").await;
    let (mut survivor, _) = login(&hub, "carol").await;
    let (mut poster, _) = login(&hub, "bob").await;
    subscribe(&mut doomed, 42).await;
    subscribe(&mut survivor, 42).await;

    // Vanish without a close handshake.
    drop(doomed);

    for n in 0..3 {
        send(&mut poster, &ClientMessage::chat(ChannelId::new(42), format!("m{n}"))).await;
    }
    for n in 0..3 {
        match read_event(&mut survivor).await {
            ServerEvent::Message { message, .. } => assert_eq!(message.content, format!("m{n}")),
            other => panic!("expected message, got {other:?}"),
        }
    }

    timeout(TIMEOUT, async {
        while hub.server.hub().subscriber_count(ChannelId::new(42)) > 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("dead connection was never deregistered");
}

#[tokio::test]
async fn over_capacity_closes_with_try_again_later() {
    let hub = boot(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;
    let (_first, _) = login(&hub, "alice").await;
    let (mut second, _) = connect_async(format!("{}?token=bob", hub.base))
        .await
        .unwrap();
    assert_eq!(read_close_code(&mut second).await, close::TRY_AGAIN_LATER);
}

#[tokio::test]
async fn unresponsive_client_is_reaped() {
    let hub = boot(ServerConfig {
        heartbeat_interval_ms: 100,
        ..ServerConfig::default()
    })
    .await;
    // Never polled again, so pings go unanswered.
    let (_silent, _) = login(&hub, "alice").await;

    timeout(TIMEOUT, async {
        while hub.server.hub().connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("silent connection was never reaped");
}

#[tokio::test]
async fn shutdown_closes_sessions_with_going_away() {
    let hub = boot_default().await;
    let (mut ws, _) = login(&hub, "alice").await;

    let server = hub.server.clone();
    let drained = tokio::spawn(async move { server.shutdown_gracefully().await });

    assert_eq!(read_close_code(&mut ws).await, close::GOING_AWAY);
    assert!(drained.await.unwrap());
}
