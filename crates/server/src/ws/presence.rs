use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::AppResult;
use crate::services::users;
use crate::ws::gateway::GatewayHandle;

/// Mirrors hub connectivity into `users.is_online`.
///
/// Connect and disconnect only schedule a sync; the value written is read
/// from the hub when the sync runs. Syncs are serialised, so the last one
/// to run always sees every connection change that scheduled it.
#[derive(Clone)]
pub struct PresenceSync {
    db: SqlitePool,
    gateway: GatewayHandle,
    lock: Arc<Mutex<()>>,
}

impl PresenceSync {
    pub fn new(db: SqlitePool, gateway: GatewayHandle) -> Self {
        Self {
            db,
            gateway,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Store the user's current hub presence. Returns what was written.
    pub async fn sync(&self, user_id: &str) -> AppResult<bool> {
        let _guard = self.lock.lock().await;
        let online = self.gateway.is_online(user_id).await;
        users::set_presence(&self.db, user_id, online).await?;
        tracing::debug!(user_id = %user_id, online, "Presence synced");
        Ok(online)
    }
}
