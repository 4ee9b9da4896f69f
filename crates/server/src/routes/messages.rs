use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::error::AppResult;
use crate::models::{
    AuthUser, BatchStatusRequest, DeliveryStatus, EditMessageRequest, MessageView,
    ReactionRequest, StatusChange, StatusRequest,
};
use crate::ws::events::ServerEvent;
use crate::ws::notify;
use crate::AppState;

/// Re-read a message and push it to its conversation as `message_updated`.
async fn publish_update(state: &AppState, message_id: &str, reader_id: &str) {
    match state.messages().get(message_id, reader_id).await {
        Ok(message) => {
            let conversation_id = message.conversation_id.clone();
            notify::to_conversation(
                state,
                &conversation_id,
                &ServerEvent::MessageUpdated { message },
                None,
            )
            .await;
        }
        Err(e) => tracing::warn!(message_id = %message_id, error = %e, "Could not reload message"),
    }
}

/// PATCH /api/messages/{messageId}
pub async fn edit_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(message_id): Path<String>,
    Json(body): Json<EditMessageRequest>,
) -> AppResult<Json<MessageView>> {
    let message = state
        .messages()
        .update(&message_id, &user.id, &body.content)
        .await?;

    notify::to_conversation(
        &state,
        &message.conversation_id,
        &ServerEvent::MessageUpdated {
            message: message.clone(),
        },
        None,
    )
    .await;

    Ok(Json(message))
}

/// DELETE /api/messages/{messageId}
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(message_id): Path<String>,
) -> AppResult<StatusCode> {
    let deleted = state.messages().delete(&message_id, &user.id).await?;

    notify::to_conversation(
        &state,
        &deleted.conversation_id,
        &ServerEvent::MessageDeleted {
            message_id: deleted.id.clone(),
            conversation_id: deleted.conversation_id.clone(),
        },
        None,
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/messages/{messageId}/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(message_id): Path<String>,
    Json(body): Json<StatusRequest>,
) -> AppResult<Json<StatusChange>> {
    let status = body.status.parse::<DeliveryStatus>()?;
    let change = state
        .messages()
        .update_status(&message_id, &user.id, status)
        .await?;

    publish_update(&state, &message_id, &user.id).await;
    Ok(Json(change))
}

/// POST /api/messages/status
pub async fn batch_update_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<BatchStatusRequest>,
) -> AppResult<Json<Vec<StatusChange>>> {
    let status = body.status.parse::<DeliveryStatus>()?;
    let changes = state
        .messages()
        .batch_update_status(&body.message_ids, &user.id, status)
        .await?;

    for change in &changes {
        publish_update(&state, &change.message_id, &user.id).await;
    }
    Ok(Json(changes))
}

/// POST /api/messages/{messageId}/reactions
pub async fn add_reaction(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(message_id): Path<String>,
    Json(body): Json<ReactionRequest>,
) -> AppResult<impl IntoResponse> {
    let added = state
        .messages()
        .add_reaction(&message_id, &user.id, &body.emoji)
        .await?;

    if added {
        publish_update(&state, &message_id, &user.id).await;
    }
    let message = state.messages().get(&message_id, &user.id).await?;
    let status = if added {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(message)))
}

/// DELETE /api/messages/{messageId}/reactions/{emoji}
pub async fn remove_reaction(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((message_id, emoji)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    let removed = state
        .messages()
        .remove_reaction(&message_id, &user.id, &emoji)
        .await?;

    if removed {
        publish_update(&state, &message_id, &user.id).await;
    }
    Ok(StatusCode::NO_CONTENT)
}
