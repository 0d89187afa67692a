//! REST hooks for the persistence side of the relay.
//!
//! Conversations are created and listed here, and `POST /api/notify` is the
//! "message durably created" ingress that pushes a live notification to the
//! other members without going through any client's receive loop.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::AuthUser;
use crate::directory::{Conversation, DirectoryError};
use crate::relay::DispatchOutcome;
use crate::state::AppState;
use crate::ws::protocol::NEW_MESSAGE_KIND;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub recipient: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: String,
    pub members: Vec<String>,
    pub created: i64,
    /// Caller's own unseen flag
    pub unseen: bool,
}

impl ConversationResponse {
    fn for_user(conversation: Conversation, username: &str) -> Self {
        let unseen = conversation.unseen_for(username).unwrap_or(false);
        Self {
            id: conversation.id,
            members: conversation.members,
            created: conversation.created,
            unseen,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotifyRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub kind: Option<String>,
}

fn status_for(err: &DirectoryError) -> StatusCode {
    match err {
        DirectoryError::NotFound(_) => StatusCode::NOT_FOUND,
        DirectoryError::SelfConversation => StatusCode::BAD_REQUEST,
        DirectoryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /api/conversations -- open a conversation with another user.
pub async fn create_conversation(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ConversationResponse>), StatusCode> {
    if body.recipient.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let directory = state.directory.clone();
    let sender = username.clone();
    let conversation =
        tokio::task::spawn_blocking(move || directory.create(&sender, &body.recipient))
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .map_err(|e| {
                tracing::warn!(user_id = %username, error = %e, "Create conversation failed");
                status_for(&e)
            })?;

    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse::for_user(conversation, &username)),
    ))
}

/// GET /api/conversations -- every conversation the caller belongs to.
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
) -> Result<Json<Vec<ConversationResponse>>, StatusCode> {
    let directory = state.directory.clone();
    let user = username.clone();
    let conversations = tokio::task::spawn_blocking(move || directory.get_for_user(&user))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| status_for(&e))?;

    Ok(Json(
        conversations
            .into_iter()
            .map(|c| ConversationResponse::for_user(c, &username))
            .collect(),
    ))
}

/// POST /api/conversations/{id}/seen -- clear the caller's unseen flag.
pub async fn mark_seen(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Path(conversation_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let directory = state.directory.clone();
    tokio::task::spawn_blocking(move || directory.mark_seen(&username, &conversation_id))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| status_for(&e))?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/notify -- a message from the caller was stored.
/// Flags the conversation unseen for every other member, then relays a
/// notification to those currently connected.
pub async fn notify(
    State(state): State<AppState>,
    AuthUser(username): AuthUser,
    Json(body): Json<NotifyRequest>,
) -> Result<(StatusCode, Json<DispatchOutcome>), StatusCode> {
    let directory = state.directory.clone();
    let sender = username.clone();
    let conversation_id = body.conversation_id.clone();

    tokio::task::spawn_blocking(move || directory.mark_unseen_except(&sender, &conversation_id))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|e| {
            tracing::warn!(user_id = %username, error = %e, "Notify rejected");
            status_for(&e)
        })?;

    let kind = body.kind.as_deref().unwrap_or(NEW_MESSAGE_KIND);
    let outcome = state
        .relay
        .notify(&body.conversation_id, &username, kind)
        .await;

    Ok((StatusCode::ACCEPTED, Json(outcome)))
}
