use crate::models::AuthUser;
use crate::ws::gateway::ClientId;
use crate::AppState;

pub fn handle_connect(state: &AppState, client_id: ClientId, user: &AuthUser) {
    tracing::info!(user_id = %user.id, client_id, "Client connected");
    schedule_presence(state, "presence_online", &user.id);
}

pub async fn handle_disconnect(state: &AppState, client_id: ClientId, user: &AuthUser) {
    let still_connected = state.gateway.unregister(client_id, &user.id).await;
    tracing::info!(user_id = %user.id, client_id, "Client disconnected");

    if !still_connected {
        schedule_presence(state, "presence_offline", &user.id);
    }
}

fn schedule_presence(state: &AppState, name: &'static str, user_id: &str) {
    let presence = state.presence.clone();
    let user_id = user_id.to_string();
    state.tasks.submit(name, async move {
        presence.sync(&user_id).await.map(|_| ())
    });
}
