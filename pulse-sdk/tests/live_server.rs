//! End-to-end tests against a local WebSocket notification server.
//!
//! Tests cover:
//! - Endpoint derivation and bearer token delivery during the handshake
//! - Welcome and notification dispatch from real frames
//! - mark_read command round trip
//! - Heartbeat pings answered with pongs that are never dispatched
//! - Handshake rejection surfacing as a connect error
//! - Reconnect after the server drops the socket without a close frame
//! - No reconnect after a normal server-side close

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

use pulse_sdk::{
    ClientConfig, ClientError, ConnectionStatus, Event, EventKind, NotificationClient, Subscription,
    TransportError,
};

/// How long to wait for an event before considering it failed.
const TIMEOUT: Duration = Duration::from_secs(5);

// ── Server ───────────────────────────────────────────────────────

#[derive(Default)]
struct ServerState {
    connections: AtomicUsize,
    pings: AtomicUsize,
}

#[derive(Deserialize)]
struct WsParams {
    user_id: String,
}

async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    State(state): State<Arc<ServerState>>,
) -> Response {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    if bearer.as_deref() == Some("revoked") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let connection = state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| serve_socket(socket, state, params.user_id, bearer, connection))
        .into_response()
}

async fn send_json(socket: &mut WebSocket, value: Value) -> bool {
    socket.send(Message::Text(value.to_string().into())).await.is_ok()
}

async fn serve_socket(
    mut socket: WebSocket,
    state: Arc<ServerState>,
    user_id: String,
    bearer: Option<String>,
    connection: usize,
) {
    let welcome = json!({
        "type": "welcome",
        "data": { "user_id": user_id, "bearer": bearer, "connection": connection },
        "timestamp": "2026-01-01T00:00:00Z",
    });
    if !send_json(&mut socket, welcome).await {
        return;
    }

    match user_id.as_str() {
        // First connection vanishes without a close frame.
        "flaky" if connection == 0 => return,
        "leaving" => {
            let frame = CloseFrame {
                code: 1000,
                reason: "session ended".into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }
        _ => {}
    }

    let note = json!({ "type": "notification", "data": { "id": 1, "title": "Build finished" } });
    if !send_json(&mut socket, note).await {
        return;
    }

    while let Some(Ok(msg)) = socket.recv().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let frame: Value = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(_) => continue,
        };
        let reply = match frame["type"].as_str() {
            Some("ping") => {
                state.pings.fetch_add(1, Ordering::SeqCst);
                json!({ "type": "pong" })
            }
            Some("mark_read") => json!({
                "type": "marked_read",
                "data": { "notification_id": frame["notification_id"], "received": frame },
            }),
            _ => json!({ "type": "error", "data": { "message": "unknown command" } }),
        };
        if !send_json(&mut socket, reply).await {
            break;
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn config_for(addr: SocketAddr) -> ClientConfig {
    ClientConfig {
        api_url: format!("http://{addr}"),
        reconnect_base_delay_ms: 20,
        ..Default::default()
    }
}

fn collect(client: &NotificationClient, kind: EventKind) -> (Subscription, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sub = client.on(kind, move |event| {
        let _ = tx.send(event.clone());
        Ok(())
    });
    (sub, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("listener dropped")
}

async fn wait_status(client: &NotificationClient, want: ConnectionStatus) {
    let mut rx = client.watch_status();
    timeout(TIMEOUT, rx.wait_for(|s| *s == want))
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed");
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn welcome_and_notification_are_dispatched() {
    let (addr, _state) = start_server().await;
    let client = NotificationClient::new(config_for(addr));
    let (_w, mut welcome) = collect(&client, EventKind::Welcome);
    let (_n, mut notes) = collect(&client, EventKind::Notification);

    client.connect("42", Some("secret".into())).await.unwrap();
    assert!(client.is_connected());

    let event = next(&mut welcome).await;
    assert_eq!(event.data["user_id"], "42");
    assert_eq!(event.data["bearer"], "secret");
    assert_eq!(event.timestamp.as_deref(), Some("2026-01-01T00:00:00Z"));

    let event = next(&mut notes).await;
    assert_eq!(event.data["id"], 1);
    assert_eq!(event.data["title"], "Build finished");

    client.disconnect();
}

#[tokio::test]
async fn mark_read_round_trip() {
    let (addr, _state) = start_server().await;
    let client = NotificationClient::new(config_for(addr));
    let (_m, mut marked) = collect(&client, EventKind::MarkedRead);

    client.connect("42", None).await.unwrap();
    client.mark_read(42).unwrap();

    let event = next(&mut marked).await;
    assert_eq!(event.data["notification_id"], 42);
    assert_eq!(
        event.data["received"],
        json!({ "type": "mark_read", "notification_id": 42 })
    );
    client.disconnect();
}

#[tokio::test]
async fn heartbeat_pongs_are_not_dispatched() {
    let (addr, state) = start_server().await;
    let config = ClientConfig {
        heartbeat_interval_ms: 20,
        ..config_for(addr)
    };
    let client = NotificationClient::new(config);
    let (_e, mut errors) = collect(&client, EventKind::Error);

    client.connect("42", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(client.is_connected());
    assert!(state.pings.load(Ordering::SeqCst) >= 1, "no heartbeat reached the server");
    assert!(errors.try_recv().is_err());
    client.disconnect();
}

#[tokio::test]
async fn rejected_token_fails_connect() {
    let (addr, state) = start_server().await;
    let client = NotificationClient::new(config_for(addr));

    let err = client.connect("42", Some("revoked".into())).await.unwrap_err();
    match err {
        ClientError::Handshake(TransportError::Handshake(message)) => {
            assert!(message.contains("unauthorized"), "{message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(client.connection_status(), ConnectionStatus::Disconnected);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.connections.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dropped_socket_is_reconnected() {
    let (addr, state) = start_server().await;
    let client = NotificationClient::new(config_for(addr));
    let (_w, mut welcome) = collect(&client, EventKind::Welcome);
    let (_n, mut notes) = collect(&client, EventKind::Notification);

    client.connect("flaky", None).await.unwrap();
    assert_eq!(next(&mut welcome).await.data["connection"], 0);
    assert_eq!(next(&mut welcome).await.data["connection"], 1);
    assert_eq!(next(&mut notes).await.data["id"], 1);

    wait_status(&client, ConnectionStatus::Connected).await;
    assert_eq!(client.reconnect_attempts(), 0);
    assert_eq!(state.connections.load(Ordering::SeqCst), 2);
    client.disconnect();
}

#[tokio::test]
async fn normal_server_close_is_final() {
    let (addr, state) = start_server().await;
    let client = NotificationClient::new(config_for(addr));

    client.connect("leaving", None).await.unwrap();
    wait_status(&client, ConnectionStatus::Disconnected).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.connection_status(), ConnectionStatus::Disconnected);
    assert_eq!(state.connections.load(Ordering::SeqCst), 1);
}
