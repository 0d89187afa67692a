use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};

use crate::state::AppState;
use crate::ws::session;

/// GET /ws
/// WebSocket upgrade endpoint. Authentication happens in-band: the client
/// must send its credential as the first frame after the greeting.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session::run_session(socket, state))
}
