//! Shared harness: runs both listeners on ephemeral ports and drives them
//! with a WebSocket client and an HTTP client.
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_server::auth::{token, Role};
use relay_server::config::RelaySettings;
use relay_server::state::AppState;

pub const JWT_SECRET: &[u8] = b"integration-jwt-secret";
pub const BRIDGE_SECRET: &str = "integration-bridge-secret";

const RECV_TIMEOUT: Duration = Duration::from_secs(3);

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestRelay {
    pub ws_addr: SocketAddr,
    pub bridge_addr: SocketAddr,
    pub state: AppState,
}

impl TestRelay {
    pub fn bridge_url(&self) -> String {
        format!("http://{}{}", self.bridge_addr, self.state.settings.bridge_path)
    }

    pub fn health_url(&self) -> String {
        format!("http://{}/health", self.ws_addr)
    }
}

/// Start the relay with default settings.
pub async fn start_relay() -> TestRelay {
    start_relay_with(RelaySettings::default()).await
}

/// Start both routers on 127.0.0.1:0, sharing one state.
pub async fn start_relay_with(settings: RelaySettings) -> TestRelay {
    let state = AppState::new(JWT_SECRET, BRIDGE_SECRET.as_bytes(), settings);

    let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_addr = ws_listener.local_addr().unwrap();
    let bridge_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bridge_addr = bridge_listener.local_addr().unwrap();

    let ws_app = relay_server::routes::build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(
            ws_listener,
            ws_app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let bridge_app = relay_server::bridge::build_bridge_router(state.clone());
    tokio::spawn(async move {
        axum::serve(
            bridge_listener,
            bridge_app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestRelay {
        ws_addr,
        bridge_addr,
        state,
    }
}

pub fn token_for(user_id: i64, role: &str) -> String {
    token::issue_token(JWT_SECRET, user_id, &Role::from(role), 300).unwrap()
}

/// Open a WebSocket and consume the connection acknowledgement.
pub async fn connect(relay: &TestRelay) -> WsClient {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", relay.ws_addr))
        .await
        .expect("WebSocket connect failed");
    let hello = recv_json(&mut ws).await;
    assert_eq!(hello["type"], "connection");
    assert_eq!(hello["message"], "Connected to security notification server");
    ws
}

/// Connect and authenticate as `user_id` with `role`.
pub async fn connect_as(relay: &TestRelay, user_id: i64, role: &str) -> WsClient {
    let mut ws = connect(relay).await;
    send_json(&mut ws, json!({"type": "authenticate", "token": token_for(user_id, role)})).await;
    let reply = recv_json(&mut ws).await;
    assert_eq!(reply["type"], "auth_success", "unexpected reply: {}", reply);
    ws
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Subscribe and wait for the acknowledgement.
pub async fn subscribe(ws: &mut WsClient, channels: &[&str]) -> Value {
    send_json(ws, json!({"type": "subscribe", "channels": channels})).await;
    let reply = recv_json(ws).await;
    assert_eq!(reply["type"], "subscription_update", "unexpected reply: {}", reply);
    reply
}

/// Next text frame as JSON. Control frames are skipped; reading keeps the
/// client answering server pings.
pub async fn recv_json(ws: &mut WsClient) -> Value {
    loop {
        let frame = timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("WebSocket error");
        match frame {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("server sent invalid JSON")
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Assert no text frame arrives within `window`.
pub async fn expect_silence(ws: &mut WsClient, window: Duration) {
    if let Ok(value) = timeout(window, recv_json(ws)).await {
        panic!("expected no message, got {}", value);
    }
}

/// Read until the server's close frame and return its code.
pub async fn recv_close_code(ws: &mut WsClient) -> Option<u16> {
    loop {
        match timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

/// Poll until the registry holds `expected` connections.
pub async fn wait_for_connections(relay: &TestRelay, expected: usize) {
    let registry = &relay.state.registry;
    timeout(RECV_TIMEOUT, async {
        while registry.len() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "registry has {} connections, expected {}",
            registry.len(),
            expected
        )
    });
}

pub async fn post_bridge(relay: &TestRelay, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(relay.bridge_url())
        .json(&body)
        .send()
        .await
        .unwrap()
}
