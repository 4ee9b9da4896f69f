use crate::error::{AppError, AppResult};
use crate::models::{AuthUser, MediaDescriptor, MessageType, NewMessage};
use crate::services::participant_role;
use crate::ws::events::ServerEvent;
use crate::ws::gateway::ClientId;
use crate::ws::notify;
use crate::AppState;

pub async fn handle_new_message(
    state: &AppState,
    user: &AuthUser,
    conversation_id: String,
    content: String,
    message_type: Option<String>,
    reply_to_id: Option<String>,
    media: Option<MediaDescriptor>,
) -> AppResult<()> {
    let message_type = match message_type {
        Some(t) => t.parse::<MessageType>()?,
        None => MessageType::default(),
    };

    let message = state
        .messages()
        .create(NewMessage {
            conversation_id,
            sender_id: user.id.clone(),
            content,
            message_type,
            reply_to_id,
            media,
        })
        .await?;

    let conversation_id = message.conversation_id.clone();
    notify::to_conversation(state, &conversation_id, &ServerEvent::NewMessage { message }, None)
        .await;
    Ok(())
}

pub async fn handle_edit_message(
    state: &AppState,
    user: &AuthUser,
    message_id: String,
    content: String,
) -> AppResult<()> {
    let message = state
        .messages()
        .update(&message_id, &user.id, &content)
        .await?;

    let conversation_id = message.conversation_id.clone();
    notify::to_conversation(
        state,
        &conversation_id,
        &ServerEvent::MessageUpdated { message },
        None,
    )
    .await;
    Ok(())
}

pub async fn handle_delete_message(
    state: &AppState,
    user: &AuthUser,
    message_id: String,
) -> AppResult<()> {
    let deleted = state.messages().delete(&message_id, &user.id).await?;

    notify::to_conversation(
        state,
        &deleted.conversation_id,
        &ServerEvent::MessageDeleted {
            message_id: deleted.id.clone(),
            conversation_id: deleted.conversation_id.clone(),
        },
        None,
    )
    .await;
    Ok(())
}

pub async fn handle_mark_read(
    state: &AppState,
    user: &AuthUser,
    conversation_id: String,
) -> AppResult<()> {
    let receipt = state
        .conversations()
        .mark_read(&conversation_id, &user.id)
        .await?;

    notify::to_conversation(state, &conversation_id, &receipt.into(), None).await;
    Ok(())
}

/// Typing indicators are not stored. They go to the other participants'
/// connections and to the sender's other connections.
pub async fn handle_typing(
    state: &AppState,
    client_id: ClientId,
    user: &AuthUser,
    conversation_id: String,
    active: bool,
) -> AppResult<()> {
    if participant_role(&state.db, &conversation_id, &user.id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound);
    }

    let event = if active {
        ServerEvent::TypingStart {
            conversation_id: conversation_id.clone(),
            user_id: user.id.clone(),
        }
    } else {
        ServerEvent::TypingStop {
            conversation_id: conversation_id.clone(),
            user_id: user.id.clone(),
        }
    };

    notify::to_conversation(state, &conversation_id, &event, Some(client_id)).await;
    Ok(())
}
