pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod tasks;
pub mod ws;

use config::Config;
use std::sync::Arc;

use crate::auth::TokenService;
use crate::crypto::KeyProvider;
use crate::services::{ConversationDirectory, MessageStore, UserDirectory};
use crate::tasks::TaskRunner;
use crate::ws::gateway::GatewayHandle;
use crate::ws::presence::PresenceSync;

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub keys: Arc<KeyProvider>,
    pub tokens: TokenService,
    pub gateway: GatewayHandle,
    pub presence: PresenceSync,
    pub tasks: Arc<TaskRunner>,
}

impl AppState {
    /// Wire up shared state. Spawns the hub and the task workers, so it must
    /// run inside a tokio runtime.
    pub fn new(db: sqlx::SqlitePool, config: Config, keys: Arc<KeyProvider>) -> Self {
        let gateway = GatewayHandle::spawn();
        Self {
            tokens: TokenService::new(&config.auth_secret, config.token_ttl_secs),
            presence: PresenceSync::new(db.clone(), gateway.clone()),
            gateway,
            tasks: Arc::new(TaskRunner::start(
                config.task_workers,
                config.task_queue_capacity,
            )),
            db,
            config,
            keys,
        }
    }

    // Services are built per call so they always carry the active key.

    pub fn users(&self) -> UserDirectory {
        UserDirectory::new(self.db.clone(), self.keys.manager())
    }

    pub fn conversations(&self) -> ConversationDirectory {
        ConversationDirectory::new(self.db.clone(), self.keys.manager())
    }

    pub fn messages(&self) -> MessageStore {
        MessageStore::new(self.db.clone(), self.keys.manager())
    }
}
