use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};

use crate::error::{AuthError, RelayError};
use crate::state::AppState;
use crate::ws::broadcast::{force_close, CLOSE_SUPERSEDED};
use crate::ws::protocol::{self, AUTHENTICATED_NOTICE, OPEN_NOTICE};
use crate::ws::ConnectionSender;

/// Close code sent when the handshake credential is rejected.
pub const CLOSE_AUTH_FAILED: u16 = 4002;
/// Close code sent when the client stops answering pings.
pub const CLOSE_PONG_TIMEOUT: u16 = 1001;

/// How long the writer gets to flush the close reply after a client close.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection limits and policies.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to wait for the credential frame. `None` waits forever.
    pub handshake_timeout: Option<Duration>,
    /// Largest credential frame accepted, in bytes.
    pub max_handshake_bytes: usize,
    /// Close the previous connection when a user authenticates again.
    pub close_superseded: bool,
    /// Keepalive ping interval. `None` disables pings.
    pub ping_interval: Option<Duration>,
    /// How long a ping may go unanswered before the connection is closed.
    /// `None` keeps pinging without checking for pongs.
    pub pong_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Some(Duration::from_secs(10)),
            max_handshake_bytes: 8192,
            close_superseded: true,
            ping_interval: Some(Duration::from_secs(30)),
            pong_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// Lifecycle of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHandshake,
    Authenticating,
    Active,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (AwaitingHandshake, Authenticating)
                | (AwaitingHandshake, Closed)
                | (Authenticating, Active)
                | (Authenticating, Closed)
                | (Active, Closed)
        )
    }
}

struct Session {
    state: SessionState,
}

impl Session {
    fn new() -> Self {
        Self {
            state: SessionState::AwaitingHandshake,
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid session transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(from = ?self.state, to = ?next, "Session transition");
        self.state = next;
    }
}

/// Drive one accepted WebSocket from greeting to teardown.
///
/// The socket is split: a writer task owns the sink and drains an mpsc
/// channel, which is what the registry hands out to the relay. This task
/// keeps the stream and runs the handshake and receive loop.
///
/// Only `RelayError::Auth` and `RelayError::TransportClosed` end a session.
pub async fn run_session(socket: WebSocket, state: AppState) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();
    let mut writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    let mut session = Session::new();

    if let Ok(greeting) = protocol::notice(OPEN_NOTICE) {
        let _ = tx.send(greeting);
    }

    let verified = match await_credential(&mut ws_receiver, &state.session).await {
        Ok(credential) => {
            session.transition(SessionState::Authenticating);
            state.verifier.verify(&credential).map_err(RelayError::from)
        }
        Err(e) => Err(e),
    };

    let user_id = match verified {
        Ok(user_id) => user_id,
        Err(e) => {
            if let RelayError::Auth(_) = e {
                tracing::warn!(error = %e, "WebSocket handshake rejected");
                force_close(&tx, CLOSE_AUTH_FAILED, "Authentication failed");
            } else {
                tracing::info!(error = %e, "Connection ended during handshake");
            }
            session.transition(SessionState::Closed);
            drop(tx);
            let _ = writer_handle.await;
            return;
        }
    };

    // Active: the registry now points at this connection
    if let Some(previous) = state.connections.register(&user_id, tx.clone()) {
        tracing::info!(user_id = %user_id, "Superseding previous connection");
        if state.session.close_superseded {
            force_close(&previous, CLOSE_SUPERSEDED, "Superseded by a newer connection");
        }
    }
    session.transition(SessionState::Active);

    if let Ok(confirmation) = protocol::notice(AUTHENTICATED_NOTICE) {
        let _ = tx.send(confirmation);
    }

    tracing::info!(user_id = %user_id, "WebSocket session authenticated");

    let (pong_tx, pong_rx) = mpsc::unbounded_channel::<()>();
    let ping_handle = state.session.ping_interval.map(|period| {
        tokio::spawn(ping_task(
            tx.clone(),
            period,
            state.session.pong_timeout,
            pong_rx,
        ))
    });

    let ended = loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    protocol::handle_inbound(text.as_bytes(), &state, &user_id).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    protocol::handle_inbound(&data, &state, &user_id).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    let _ = pong_tx.send(());
                }
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(user_id = %user_id, reason = ?frame, "Client initiated close");
                    // Writing a close after the peer's flushes the queued close reply
                    let _ = tx.send(Message::Close(frame));
                    let _ = timeout(CLOSE_FLUSH_TIMEOUT, &mut writer_handle).await;
                    break RelayError::TransportClosed;
                }
                Some(Err(e)) => {
                    tracing::warn!(user_id = %user_id, error = %e, "WebSocket receive error");
                    break RelayError::TransportClosed;
                }
                None => {
                    tracing::info!(user_id = %user_id, "WebSocket stream ended");
                    break RelayError::TransportClosed;
                }
            },
            _ = &mut writer_handle => {
                tracing::info!(user_id = %user_id, "WebSocket writer stopped");
                break RelayError::TransportClosed;
            }
        }
    };

    if let Some(handle) = ping_handle {
        handle.abort();
    }
    writer_handle.abort();

    state.connections.unregister(&user_id, &tx);
    session.transition(SessionState::Closed);

    tracing::info!(user_id = %user_id, reason = %ended, "WebSocket session closed");
}

/// Wait for the single credential frame.
/// Control frames are skipped. An oversized or undecodable frame, or a
/// timeout, fails authentication; a closed stream is a transport close.
async fn await_credential(
    ws_receiver: &mut SplitStream<WebSocket>,
    config: &SessionConfig,
) -> Result<String, RelayError> {
    let max = config.max_handshake_bytes;
    let read = async {
        loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) if text.len() <= max => {
                    return Ok(text.as_str().to_string());
                }
                Some(Ok(Message::Binary(data))) if data.len() <= max => {
                    return String::from_utf8(data.to_vec())
                        .map_err(|_| RelayError::from(AuthError));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {
                    tracing::warn!(limit = max, "Handshake frame too large");
                    return Err(RelayError::from(AuthError));
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    return Err(RelayError::TransportClosed);
                }
            }
        }
    };

    match config.handshake_timeout {
        Some(limit) => timeout(limit, read).await.unwrap_or_else(|_| {
            tracing::warn!("Handshake timed out");
            Err(RelayError::from(AuthError))
        }),
        None => read.await,
    }
}

/// Forward queued messages to the socket.
/// Stops on the first write failure or after sending a close frame.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if ws_sender.send(msg).await.is_err() || closing {
            break;
        }
    }
}

/// Ping on every tick. With a pong timeout, a ping left unanswered for that
/// long closes the connection.
async fn ping_task(
    tx: ConnectionSender,
    period: Duration,
    pong_timeout: Option<Duration>,
    mut pong_rx: mpsc::UnboundedReceiver<()>,
) {
    let mut ticker = interval(period);
    // Skip the first immediate tick
    ticker.tick().await;

    loop {
        ticker.tick().await;

        // Pongs that arrived since the last round answer nothing now
        while pong_rx.try_recv().is_ok() {}

        if tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
            break;
        }

        let Some(limit) = pong_timeout else {
            continue;
        };
        match timeout(limit, pong_rx.recv()).await {
            Ok(Some(())) => {}
            _ => {
                tracing::warn!("Pong timeout, closing connection");
                force_close(&tx, CLOSE_PONG_TIMEOUT, "Pong timeout");
                break;
            }
        }
    }
}
