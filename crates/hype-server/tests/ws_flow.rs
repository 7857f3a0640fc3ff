//! End-to-end tests over real WebSocket connections.

use futures_util::{SinkExt, StreamExt};
use hype_protocol::{codec, ClientEvent, ServerEvent};
use hype_server::{handlers, AppState, Config};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> Config {
    let mut config = Config::default();
    config.metrics.enabled = false;
    config
}

async fn start(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(AppState::from_config(config).unwrap());
    tokio::spawn(handlers::serve(listener, state));
    addr
}

async fn open(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

async fn send(ws: &mut Client, event: &ClientEvent) {
    ws.send(Message::Text(codec::encode_text(event).unwrap()))
        .await
        .unwrap();
}

async fn recv(ws: &mut Client) -> ServerEvent {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("stream ended")
            .unwrap();
        match msg {
            Message::Text(text) => return codec::decode_text(&text).unwrap(),
            Message::Binary(data) => return codec::decode(&data).unwrap(),
            _ => continue,
        }
    }
}

/// Connect as `name` and consume the greeting.
async fn login(addr: SocketAddr, name: &str) -> Client {
    let mut ws = open(addr).await;
    send(&mut ws, &ClientEvent::connect(1, name, format!("{name}-token"))).await;
    assert!(matches!(recv(&mut ws).await, ServerEvent::Connected { username, .. } if username == name));
    assert!(matches!(recv(&mut ws).await, ServerEvent::InitialData { .. }));
    ws
}

#[tokio::test]
async fn test_chat_between_two_clients() {
    let addr = start(test_config()).await;
    let mut alice = login(addr, "alice").await;
    let mut bob = login(addr, "bob").await;
    assert_eq!(
        recv(&mut alice).await,
        ServerEvent::UserOnline {
            username: "bob".to_string()
        }
    );

    send(&mut alice, &ClientEvent::chat("bob", "hi")).await;

    assert!(matches!(
        recv(&mut bob).await,
        ServerEvent::ReceiveMessage { from, body, is_self: false, .. } if from == "alice" && body == "hi"
    ));
    assert!(matches!(
        recv(&mut alice).await,
        ServerEvent::ReceiveMessage { from, body, is_self: true, .. } if from == "alice" && body == "hi"
    ));

    send(
        &mut alice,
        &ClientEvent::GetHistory {
            partner: "bob".to_string(),
            limit: None,
        },
    )
    .await;
    match recv(&mut alice).await {
        ServerEvent::MessageHistory { partner, messages } => {
            assert_eq!(partner, "bob");
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].from, "alice");
            assert_eq!(messages[0].body, "hi");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_version_mismatch_is_refused() {
    let addr = start(test_config()).await;
    let mut ws = open(addr).await;

    send(&mut ws, &ClientEvent::connect(9, "alice", "token")).await;
    assert!(matches!(recv(&mut ws).await, ServerEvent::Error { code: 1001, .. }));

    let next = tokio::time::timeout(Duration::from_secs(5), ws.next()).await.unwrap();
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
}

#[tokio::test]
async fn test_first_event_must_be_connect() {
    let addr = start(test_config()).await;
    let mut ws = open(addr).await;

    send(&mut ws, &ClientEvent::chat("bob", "hi")).await;
    assert!(matches!(recv(&mut ws).await, ServerEvent::Error { code: 1002, .. }));
}

#[tokio::test]
async fn test_wrong_token_is_refused() {
    let addr = start(test_config()).await;
    drop(login(addr, "alice").await);

    let mut ws = open(addr).await;
    send(&mut ws, &ClientEvent::connect(1, "alice", "guess")).await;
    assert!(matches!(recv(&mut ws).await, ServerEvent::Error { code: 1003, .. }));
}

#[tokio::test]
async fn test_binary_clients_get_binary_replies() {
    let addr = start(test_config()).await;
    let mut ws = open(addr).await;

    let connect = codec::encode(&ClientEvent::connect(1, "alice", "token")).unwrap();
    ws.send(Message::Binary(connect.to_vec())).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(first, Message::Binary(_)));
    assert!(matches!(recv(&mut ws).await, ServerEvent::InitialData { .. }));

    let ping = codec::encode(&ClientEvent::Ping { timestamp: Some(42) }).unwrap();
    ws.send(Message::Binary(ping.to_vec())).await.unwrap();
    assert_eq!(recv(&mut ws).await, ServerEvent::pong(Some(42)));
}

#[tokio::test]
async fn test_bad_input_is_reported_and_survivable() {
    let mut config = test_config();
    config.limits.max_message_size = 256;
    let addr = start(config).await;
    let mut ws = login(addr, "alice").await;

    send(&mut ws, &ClientEvent::DemoMessage { body: "x".repeat(1024) }).await;
    assert!(matches!(recv(&mut ws).await, ServerEvent::Error { code: 1002, .. }));

    ws.send(Message::Text("{not json".to_string())).await.unwrap();
    assert!(matches!(recv(&mut ws).await, ServerEvent::Error { code: 1002, .. }));

    // Unknown kinds are ignored; the ping after it still answers.
    ws.send(Message::Text(json!({"event": "set_theme"}).to_string()))
        .await
        .unwrap();
    send(&mut ws, &ClientEvent::Ping { timestamp: None }).await;
    assert_eq!(recv(&mut ws).await, ServerEvent::pong(None));
}

#[tokio::test]
async fn test_disconnect_during_call_hangs_up() {
    let addr = start(test_config()).await;
    let mut alice = login(addr, "alice").await;
    let mut bob = login(addr, "bob").await;
    recv(&mut alice).await; // user_online bob

    send(
        &mut alice,
        &ClientEvent::SdpOffer {
            to: "bob".to_string(),
            sdp: json!({"type": "offer", "sdp": "v=0"}),
        },
    )
    .await;
    assert!(matches!(recv(&mut bob).await, ServerEvent::SdpOffer { from, .. } if from == "alice"));

    send(
        &mut bob,
        &ClientEvent::SdpAnswer {
            to: "alice".to_string(),
            sdp: json!({"type": "answer", "sdp": "v=0"}),
        },
    )
    .await;
    assert!(matches!(recv(&mut alice).await, ServerEvent::SdpAnswer { from, .. } if from == "bob"));

    alice.close(None).await.unwrap();

    let mut seen = Vec::new();
    while !seen.contains(&ServerEvent::call_end("alice")) {
        seen.push(recv(&mut bob).await);
    }
    assert!(seen.contains(&ServerEvent::UserOffline {
        username: "alice".to_string()
    }));
}

#[tokio::test]
async fn test_connection_limit() {
    let mut config = test_config();
    config.limits.max_connections = 1;
    let addr = start(config).await;

    let _alice = login(addr, "alice").await;

    let err = connect_async(format!("ws://{addr}/ws")).await.unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 503),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let addr = start(test_config()).await;
    let _alice = login(addr, "alice").await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    let body = &response[response.find("\r\n\r\n").unwrap() + 4..];
    let health: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["online"], 1);
    assert_eq!(health["users"], json!(["alice"]));
    assert_eq!(health["calls"], 0);
}
