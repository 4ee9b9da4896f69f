use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::error::AppResult;
use crate::models::{
    AddParticipantRequest, AuthUser, ConversationDetail, ConversationSummary,
    CreateConversationRequest, MessageQuery, MessageType, MessageView, NewMessage, Page,
    ParticipantView, ReadReceipt, Role, SendMessageRequest, UpdateRoleRequest,
};
use crate::ws::events::ServerEvent;
use crate::ws::notify;
use crate::AppState;

/// POST /api/conversations
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<CreateConversationRequest>,
) -> AppResult<impl IntoResponse> {
    let conversation = state
        .conversations()
        .create(&user.id, &body.member_ids, body.name)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /api/conversations
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(state.conversations().list_for_user(&user.id).await?))
}

/// GET /api/conversations/{conversationId}
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(conversation_id): Path<String>,
) -> AppResult<Json<ConversationDetail>> {
    Ok(Json(
        state
            .conversations()
            .get_by_id(&conversation_id, &user.id)
            .await?,
    ))
}

/// POST /api/conversations/{conversationId}/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(conversation_id): Path<String>,
) -> AppResult<Json<ReadReceipt>> {
    let receipt = state
        .conversations()
        .mark_read(&conversation_id, &user.id)
        .await?;

    notify::to_conversation(&state, &conversation_id, &receipt.clone().into(), None).await;
    Ok(Json(receipt))
}

/// POST /api/conversations/{conversationId}/participants
pub async fn add_participant(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(conversation_id): Path<String>,
    Json(body): Json<AddParticipantRequest>,
) -> AppResult<impl IntoResponse> {
    let role = body.role.as_deref().map(str::parse::<Role>).transpose()?;
    let participant = state
        .conversations()
        .add_participant(&conversation_id, &user.id, &body.user_id, role)
        .await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

/// DELETE /api/conversations/{conversationId}/participants/{userId}
pub async fn remove_participant(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((conversation_id, target_id)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    state
        .conversations()
        .remove_participant(&conversation_id, &user.id, &target_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/conversations/{conversationId}/participants/{userId}
pub async fn update_role(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((conversation_id, target_id)): Path<(String, String)>,
    Json(body): Json<UpdateRoleRequest>,
) -> AppResult<Json<ParticipantView>> {
    let role = body.role.parse::<Role>()?;
    Ok(Json(
        state
            .conversations()
            .update_role(&conversation_id, &user.id, &target_id, role)
            .await?,
    ))
}

/// GET /api/conversations/{conversationId}/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(conversation_id): Path<String>,
    Query(query): Query<MessageQuery>,
) -> AppResult<Json<Vec<MessageView>>> {
    let page = Page::from_query(&query)?;
    Ok(Json(
        state
            .messages()
            .list_for_conversation(&conversation_id, &user.id, page)
            .await?,
    ))
}

/// POST /api/conversations/{conversationId}/messages
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(conversation_id): Path<String>,
    Json(body): Json<SendMessageRequest>,
) -> AppResult<impl IntoResponse> {
    let message_type = match body.message_type.as_deref() {
        Some(t) => t.parse::<MessageType>()?,
        None => MessageType::default(),
    };

    let message = state
        .messages()
        .create(NewMessage {
            conversation_id: conversation_id.clone(),
            sender_id: user.id.clone(),
            content: body.content,
            message_type,
            reply_to_id: body.reply_to_id,
            media: body.media,
        })
        .await?;

    notify::to_conversation(
        &state,
        &conversation_id,
        &ServerEvent::NewMessage {
            message: message.clone(),
        },
        None,
    )
    .await;

    Ok((StatusCode::CREATED, Json(message)))
}
