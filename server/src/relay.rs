//! Membership-based fan-out.
//!
//! A frame for a conversation goes to every member except the sender that
//! currently holds a registry entry. Offline members are skipped, and a
//! failed push to one recipient never stops the others.

use axum::extract::ws::Message;
use serde::Serialize;

use crate::directory::{DirectoryError, SharedDirectory};
use crate::error::RelayError;
use crate::ws::broadcast::{send_to_user, Delivery};
use crate::ws::protocol::{self, Envelope, Notification};
use crate::ws::ConnectionRegistry;

/// Per-dispatch delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchOutcome {
    pub delivered: usize,
    pub offline: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Relay {
    registry: ConnectionRegistry,
    directory: SharedDirectory,
}

impl Relay {
    pub fn new(registry: ConnectionRegistry, directory: SharedDirectory) -> Self {
        Self {
            registry,
            directory,
        }
    }

    /// Re-transmit a client envelope verbatim to the other members.
    pub async fn dispatch(&self, envelope: &Envelope) -> DispatchOutcome {
        let members = match self.members(&envelope.conversation_id).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(
                    sender = %envelope.sender,
                    conversation_id = %envelope.conversation_id,
                    error = %e,
                    "Dropping envelope for unresolvable conversation"
                );
                return DispatchOutcome::default();
            }
        };

        self.fan_out(&members, &envelope.sender, &envelope.to_message())
    }

    /// Push a freshly built notification to the other members.
    pub async fn notify(&self, conversation_id: &str, sender: &str, kind: &str) -> DispatchOutcome {
        let members = match self.members(conversation_id).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(
                    sender = %sender,
                    conversation_id = %conversation_id,
                    error = %e,
                    "Dropping notification for unresolvable conversation"
                );
                return DispatchOutcome::default();
            }
        };

        let notification = Notification {
            message: kind.to_string(),
            conversation_id: conversation_id.to_string(),
        };
        let frame = match protocol::encode(&notification) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode notification");
                return DispatchOutcome::default();
            }
        };

        self.fan_out(&members, sender, &frame)
    }

    async fn members(&self, conversation_id: &str) -> Result<Vec<String>, RelayError> {
        let directory = self.directory.clone();
        let id = conversation_id.to_string();

        let conversation = tokio::task::spawn_blocking(move || directory.get_by_id(&id))
            .await
            .map_err(|e| DirectoryError::Storage(e.to_string()))??;

        Ok(conversation.members)
    }

    fn fan_out(&self, members: &[String], sender: &str, frame: &Message) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for member in members.iter().filter(|m| m.as_str() != sender) {
            match send_to_user(&self.registry, member, frame.clone()) {
                Ok(Delivery::Delivered) => outcome.delivered += 1,
                Ok(Delivery::Offline) => outcome.offline += 1,
                Err(e) => {
                    tracing::warn!(recipient = %member, error = %e, "Relay push failed");
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }
}
