use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::state::AppState;

/// Greeting sent as soon as the socket is accepted.
pub const OPEN_NOTICE: &str = "Websocket Open";
/// Confirmation sent once the credential has been accepted.
pub const AUTHENTICATED_NOTICE: &str = "Websocket Authenticated";
/// Default notification kind for "message created" events.
pub const NEW_MESSAGE_KIND: &str = "newmessage";

/// System notice: `{"Message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemNotice {
    pub message: String,
}

/// Server-originated notification: `{"Message": kind, "ConversationId": id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    pub message: String,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Chat,
    Typing,
    Notify,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Typing => "typing",
            Self::Notify => "notify",
        }
    }
}

/// Client relay frame: `{"User", "Message", "ConvId", "Kind"?}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RelayFrame {
    user: String,
    message: String,
    conv_id: String,
    #[serde(default, skip_serializing_if = "is_chat")]
    kind: MessageKind,
}

fn is_chat(kind: &MessageKind) -> bool {
    *kind == MessageKind::Chat
}

/// An inbound relay envelope.
///
/// `payload` holds the exact text the sender transmitted; recipients receive
/// it byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub conversation_id: String,
    pub kind: MessageKind,
    pub message: String,
    pub payload: String,
}

impl Envelope {
    /// Build an envelope from scratch, encoding its wire payload.
    pub fn new(
        sender: &str,
        conversation_id: &str,
        kind: MessageKind,
        message: &str,
    ) -> Result<Self, RelayError> {
        let frame = RelayFrame {
            user: sender.to_string(),
            message: message.to_string(),
            conv_id: conversation_id.to_string(),
            kind,
        };
        let payload = serde_json::to_string(&frame)?;
        Ok(Self {
            sender: frame.user,
            conversation_id: frame.conv_id,
            kind,
            message: frame.message,
            payload,
        })
    }

    /// Decode a frame received from a client.
    pub fn decode(data: &[u8]) -> Result<Self, RelayError> {
        let frame: RelayFrame = serde_json::from_slice(data)?;
        if frame.user.is_empty() {
            return Err(RelayError::Decode("empty User".to_string()));
        }
        if frame.conv_id.is_empty() {
            return Err(RelayError::Decode("empty ConvId".to_string()));
        }
        // from_slice already rejected invalid UTF-8
        let payload = String::from_utf8_lossy(data).into_owned();

        Ok(Self {
            sender: frame.user,
            conversation_id: frame.conv_id,
            kind: frame.kind,
            message: frame.message,
            payload,
        })
    }

    /// The verbatim frame forwarded to recipients.
    pub fn to_message(&self) -> Message {
        Message::Text(self.payload.clone().into())
    }
}

/// Encode a serializable value as a text WebSocket message.
pub fn encode<T: Serialize>(value: &T) -> Result<Message, serde_json::Error> {
    Ok(Message::Text(serde_json::to_string(value)?.into()))
}

pub fn notice(message: &str) -> Result<Message, serde_json::Error> {
    encode(&SystemNotice {
        message: message.to_string(),
    })
}

/// Handle one inbound data frame from an authenticated session.
/// Malformed or spoofed envelopes are logged and dropped.
pub async fn handle_inbound(data: &[u8], state: &AppState, user_id: &str) {
    let envelope = match Envelope::decode(data) {
        Ok(env) => env,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Dropping malformed envelope"
            );
            return;
        }
    };

    if envelope.sender != user_id {
        tracing::warn!(
            user_id = %user_id,
            claimed = %envelope.sender,
            "Dropping envelope with mismatched sender"
        );
        return;
    }

    let outcome = state.relay.dispatch(&envelope).await;
    tracing::debug!(
        user_id = %user_id,
        conversation_id = %envelope.conversation_id,
        kind = envelope.kind.as_str(),
        delivered = outcome.delivered,
        offline = outcome.offline,
        failed = outcome.failed,
        "Envelope relayed"
    );
}
