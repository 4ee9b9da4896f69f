use std::env;

use murmur_shared::constants::{WS_HEARTBEAT_INTERVAL_MS, WS_SEND_QUEUE_CAPACITY};

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub auth_secret: String,
    pub token_ttl_secs: i64,
    pub encryption_key_path: String,
    pub ws_send_queue: usize,
    pub ws_ping_interval_secs: u64,
    pub task_workers: usize,
    pub task_queue_capacity: usize,
    pub shutdown_grace_secs: u64,
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parsed("PORT", 3001),
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "./murmur.db".into()),
            auth_secret: env::var("AUTH_SECRET").expect("AUTH_SECRET must be set"),
            token_ttl_secs: parsed("TOKEN_TTL_SECS", 7 * 24 * 60 * 60),
            encryption_key_path: env::var("ENCRYPTION_KEY_PATH")
                .unwrap_or_else(|_| "./data/encryption.key".into()),
            ws_send_queue: parsed("WS_SEND_QUEUE", WS_SEND_QUEUE_CAPACITY).max(1),
            ws_ping_interval_secs: parsed("WS_PING_INTERVAL_SECS", WS_HEARTBEAT_INTERVAL_MS / 1000)
                .max(1),
            task_workers: parsed("TASK_WORKERS", 4).max(1),
            task_queue_capacity: parsed("TASK_QUEUE_CAPACITY", 1024).max(1),
            shutdown_grace_secs: parsed("SHUTDOWN_GRACE_SECS", 10),
        }
    }
}
