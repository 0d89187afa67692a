use axum::extract::ws::{CloseFrame, Message};

use super::{ConnectionRegistry, ConnectionSender};
use crate::error::RelayError;

/// Close code sent to a connection replaced by a newer handshake.
pub const CLOSE_SUPERSEDED: u16 = 4000;

/// Result of pushing one frame to one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No live connection for the user.
    Offline,
}

/// Push a message onto a user's outbound channel, if they are connected.
pub fn send_to_user(
    registry: &ConnectionRegistry,
    user_id: &str,
    msg: Message,
) -> Result<Delivery, RelayError> {
    let Some(sender) = registry.lookup(user_id) else {
        return Ok(Delivery::Offline);
    };

    sender.send(msg).map_err(|_| RelayError::Delivery {
        recipient: user_id.to_string(),
    })?;
    Ok(Delivery::Delivered)
}

/// Ask a connection's writer to send a close frame and stop.
pub fn force_close(sender: &ConnectionSender, close_code: u16, reason: &str) {
    let close_frame = CloseFrame {
        code: close_code,
        reason: reason.into(),
    };
    let _ = sender.send(Message::Close(Some(close_frame)));
}
