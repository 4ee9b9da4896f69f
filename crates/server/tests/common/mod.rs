#![allow(dead_code)]

pub mod ws_helpers;

use axum::Router;
use murmur_server::{config::Config, crypto, crypto::KeyProvider, db, routes, AppState};
use murmur_server::models::{ConversationDetail, RegisterRequest};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;

pub const TEST_PASSWORD: &str = "correct-horse-battery";

/// Create an in-memory SQLite pool with schema applied.
pub async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .unwrap();

    db::apply_schema(&pool).await.unwrap();
    pool
}

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        database_path: ":memory:".into(),
        auth_secret: "test-secret".into(),
        token_ttl_secs: 3600,
        encryption_key_path: String::new(),
        ws_send_queue: 64,
        ws_ping_interval_secs: 30,
        task_workers: 2,
        task_queue_capacity: 64,
        shutdown_grace_secs: 1,
    }
}

/// Shared state over `pool` with a throwaway in-memory key.
pub fn create_test_state(pool: SqlitePool) -> Arc<AppState> {
    let keys = Arc::new(KeyProvider::in_memory(crypto::generate_key()));
    Arc::new(AppState::new(pool, test_config(), keys))
}

/// Build a test Axum app over the given state.
pub fn create_test_app(state: Arc<AppState>) -> Router {
    routes::build_router(state)
}

/// Register a user through the directory. Returns (user_id, access_token).
pub async fn create_test_user(state: &AppState, handle: &str) -> (String, String) {
    let profile = state
        .users()
        .register(RegisterRequest {
            handle: handle.into(),
            password: TEST_PASSWORD.into(),
            email: Some(format!("{handle}@test.com")),
            phone: None,
        })
        .await
        .unwrap();
    let token = state.tokens.issue(&profile.id).unwrap();
    (profile.id, token)
}

pub async fn create_direct(state: &AppState, a: &str, b: &str) -> ConversationDetail {
    state
        .conversations()
        .create(a, &[b.to_string()], None)
        .await
        .unwrap()
}

pub async fn create_group(state: &AppState, owner: &str, members: &[&str]) -> ConversationDetail {
    let members: Vec<String> = members.iter().map(|m| m.to_string()).collect();
    state
        .conversations()
        .create(owner, &members, Some("Test group".into()))
        .await
        .unwrap()
}
