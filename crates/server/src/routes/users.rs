use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::error::AppResult;
use crate::models::{AuthUser, PublicUser, UserProfile};
use crate::AppState;

/// GET /api/users/me
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<Json<UserProfile>> {
    Ok(Json(state.users().profile(&user.id).await?))
}

/// DELETE /api/users/me
pub async fn deactivate_me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> AppResult<StatusCode> {
    state.users().deactivate(&user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/users/{userId}
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(user_id): Path<String>,
) -> AppResult<Json<PublicUser>> {
    Ok(Json(state.users().public(&user_id).await?))
}
