//! Shared helpers for integration tests: a live server on a random port and
//! a WebSocket client that knows the handshake.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_server::auth::jwt::{self, IdentityVerifier};
use relay_server::directory::SqliteDirectory;
use relay_server::state::AppState;
use relay_server::ws::session::SessionConfig;

pub const SECRET: &[u8] = b"integration-test-secret-32-bytes";

pub type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub directory: Arc<SqliteDirectory>,
}

impl TestServer {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

pub fn test_session_config() -> SessionConfig {
    SessionConfig {
        handshake_timeout: Some(Duration::from_secs(1)),
        max_handshake_bytes: 4096,
        close_superseded: true,
        ping_interval: None,
        pong_timeout: None,
    }
}

/// Start the server on a random port.
pub async fn start_test_server() -> TestServer {
    start_test_server_with(test_session_config()).await
}

pub async fn start_test_server_with(session: SessionConfig) -> TestServer {
    let db = relay_server::db::init_memory_db().expect("Failed to init DB");
    let directory = Arc::new(SqliteDirectory::new(db));
    let state = AppState::new(IdentityVerifier::new(SECRET), directory.clone(), session);

    let app = relay_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        addr,
        state,
        directory,
    }
}

pub fn token_for(username: &str) -> String {
    jwt::issue_token(SECRET, username, Some(300)).expect("Failed to issue token")
}

/// Receive the next text frame, skipping control frames.
pub async fn recv_text(read: &mut WsRead) -> String {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Timed out waiting for a message")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return text.as_str().to_owned(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected text frame, got {:?}", other),
        }
    }
}

/// Assert no data frame arrives within `wait`.
pub async fn expect_silence(read: &mut WsRead, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, read.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(other) => panic!("Expected no message, got {:?}", other),
        }
    }
}

/// Wait for the server to close the connection. Returns the close code, if
/// a close frame carried one.
pub async fn expect_closed(read: &mut WsRead) -> Option<u16> {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(3), read.next())
            .await
            .expect("Timed out waiting for close");
        match next {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("Expected close, got {:?}", other),
            Some(Err(_)) | None => return None,
        }
    }
}

/// Open a socket and read the greeting.
pub async fn open(server: &TestServer) -> (WsWrite, WsRead) {
    let (ws_stream, _) = tokio_tungstenite::connect_async(server.ws_url())
        .await
        .expect("Failed to connect to WebSocket");
    let (write, mut read) = ws_stream.split();

    assert_eq!(recv_text(&mut read).await, r#"{"Message":"Websocket Open"}"#);
    (write, read)
}

/// Open a socket and complete the handshake as `username`.
pub async fn connect_as(server: &TestServer, username: &str) -> (WsWrite, WsRead) {
    let (mut write, mut read) = open(server).await;
    write
        .send(Message::text(token_for(username)))
        .await
        .expect("Failed to send credential");

    assert_eq!(
        recv_text(&mut read).await,
        r#"{"Message":"Websocket Authenticated"}"#
    );
    (write, read)
}

/// Poll until `check` holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
