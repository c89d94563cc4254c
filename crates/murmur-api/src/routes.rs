use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::{self, AppState};
use crate::conversations;
use crate::messages;
use crate::middleware::require_auth;
use crate::users;

/// Every REST route. Auth is public, everything else needs a bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users", get(users::search_users))
        .route("/conversations", post(conversations::create_conversation))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/{conversation_id}/messages", get(messages::get_messages))
        .route("/conversations/{conversation_id}/messages", post(messages::send_message))
        .route("/conversations/{conversation_id}/seen", post(conversations::mark_conversation_seen))
        .route("/messages/{message_id}/delivered", post(messages::mark_delivered))
        .route("/messages/{message_id}/seen", post(messages::mark_seen))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}

pub async fn health() -> &'static str {
    "ok"
}
