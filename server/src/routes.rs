use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::auth::middleware::Verifier;
use crate::conversations;
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the identity verifier into request extensions so the AuthUser
/// extractor can find it.
async fn inject_verifier(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(Verifier(state.verifier.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let conversation_routes = Router::new()
        .route(
            "/api/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route("/api/conversations/{id}/seen", post(conversations::mark_seen))
        .route("/api/notify", post(conversations::notify));

    // Authentication for /ws happens in-band during the handshake
    let ws_routes = Router::new().route("/ws", get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(conversation_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_verifier,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
