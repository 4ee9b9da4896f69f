use crate::ws::events::ServerEvent;
use crate::ws::gateway::ClientId;
use crate::AppState;

/// Push `event` to every current participant of the conversation.
///
/// Runs after the write it reports has committed, so a lookup failure is
/// logged rather than failing the caller.
pub async fn to_conversation(
    state: &AppState,
    conversation_id: &str,
    event: &ServerEvent,
    exclude: Option<ClientId>,
) {
    match state.conversations().participant_ids(conversation_id).await {
        Ok(user_ids) => state.gateway.publish(&user_ids, event, exclude),
        Err(e) => tracing::warn!(
            conversation_id = %conversation_id,
            error = %e,
            "Could not resolve participants for live event"
        ),
    }
}
