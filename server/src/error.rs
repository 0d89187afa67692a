//! Error taxonomy for the relay core.
//!
//! Only `Auth` and `TransportClosed` ever end a session. Everything else is
//! logged at the point it happens and the offending frame or recipient is
//! skipped.

use crate::directory::DirectoryError;

/// Credential rejected during the handshake.
/// Carries no detail; the client only sees the close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("authentication failed")]
pub struct AuthError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Normal or abnormal disconnect observed by the receive loop.
    #[error("transport closed")]
    TransportClosed,

    /// Inbound frame could not be turned into an envelope.
    #[error("malformed envelope: {0}")]
    Decode(String),

    #[error("conversation lookup failed: {0}")]
    DirectoryLookup(#[from] DirectoryError),

    /// Push to a single recipient's outbound channel failed.
    #[error("delivery to {recipient} failed")]
    Delivery { recipient: String },
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Decode(err.to_string())
    }
}
