pub mod auth;
pub mod conversations;
pub mod messages;
pub mod users;

use crate::ws;
use crate::AppState;
use axum::{routing::{delete, get, patch, post, put}, Router};
use std::sync::Arc;

pub fn build_router(state: Arc<AppState>) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login));

    let api_routes = Router::new()
        // Users
        .route("/users/me", get(users::get_me))
        .route("/users/me", delete(users::deactivate_me))
        .route("/users/{userId}", get(users::get_user))
        // Conversations
        .route("/conversations", post(conversations::create_conversation))
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/{conversationId}", get(conversations::get_conversation))
        .route("/conversations/{conversationId}/read", post(conversations::mark_read))
        .route("/conversations/{conversationId}/participants", post(conversations::add_participant))
        .route("/conversations/{conversationId}/participants/{userId}", delete(conversations::remove_participant))
        .route("/conversations/{conversationId}/participants/{userId}", patch(conversations::update_role))
        .route("/conversations/{conversationId}/messages", get(conversations::list_messages))
        .route("/conversations/{conversationId}/messages", post(conversations::send_message))
        // Messages
        .route("/messages/status", post(messages::batch_update_status))
        .route("/messages/{messageId}", patch(messages::edit_message))
        .route("/messages/{messageId}", delete(messages::delete_message))
        .route("/messages/{messageId}/status", put(messages::update_status))
        .route("/messages/{messageId}/reactions", post(messages::add_reaction))
        .route("/messages/{messageId}/reactions/{emoji}", delete(messages::remove_reaction));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .route("/gateway", get(ws::handler::ws_handler))
        .with_state(state)
}
