use std::sync::Arc;

use crate::auth::jwt::IdentityVerifier;
use crate::directory::SharedDirectory;
use crate::relay::Relay;
use crate::ws::session::SessionConfig;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Credential verifier built from the process-wide secret
    pub verifier: Arc<IdentityVerifier>,
    /// Conversation membership and unseen flags
    pub directory: SharedDirectory,
    /// Live WebSocket connection per user
    pub connections: ConnectionRegistry,
    /// Fan-out over `connections` using `directory`
    pub relay: Relay,
    /// Handshake and keepalive settings
    pub session: SessionConfig,
}

impl AppState {
    pub fn new(verifier: IdentityVerifier, directory: SharedDirectory, session: SessionConfig) -> Self {
        let connections = ConnectionRegistry::new();
        let relay = Relay::new(connections.clone(), directory.clone());
        Self {
            verifier: Arc::new(verifier),
            directory,
            connections,
            relay,
            session,
        }
    }
}
