pub mod broadcast;
pub mod handler;
pub mod protocol;
pub mod session;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sender half of a connection's outbound channel.
/// The session's writer task owns the receiving half.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Concurrent map from authenticated username to that user's single live
/// outbound channel.
///
/// Every operation is one DashMap call and so runs under that key's shard
/// lock. The map itself is never handed out.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<String, ConnectionSender>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `tx` for `user_id`, replacing any earlier entry.
    /// Returns the superseded sender, if there was one.
    pub fn register(&self, user_id: &str, tx: ConnectionSender) -> Option<ConnectionSender> {
        let previous = self.connections.insert(user_id.to_string(), tx);
        tracing::debug!(
            user_id = %user_id,
            superseded = previous.is_some(),
            "Connection registered"
        );
        previous
    }

    /// Remove the entry for `user_id` only if it still points at `tx`.
    /// Returns whether an entry was removed.
    pub fn unregister(&self, user_id: &str, tx: &ConnectionSender) -> bool {
        let removed = self
            .connections
            .remove_if(user_id, |_, current| current.same_channel(tx))
            .is_some();
        tracing::debug!(user_id = %user_id, removed = removed, "Connection unregistered");
        removed
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionSender> {
        self.connections.get(user_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
