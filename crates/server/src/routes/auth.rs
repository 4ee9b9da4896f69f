use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;

use crate::error::AppResult;
use crate::models::{LoginRequest, RegisterRequest, SessionResponse};
use crate::services::users;
use crate::AppState;

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    let user = state.users().register(body).await?;
    let token = state.tokens.issue(&user.id)?;

    Ok((StatusCode::CREATED, Json(SessionResponse { user, token })))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<SessionResponse>> {
    let directory = state.users();
    let user_id = directory.authenticate(&body.handle, &body.password).await?;
    let token = state.tokens.issue(&user_id)?;
    let user = directory.profile(&user_id).await?;

    let db = state.db.clone();
    let seen_id = user_id.clone();
    state.tasks.submit("touch_last_seen", async move {
        users::touch_last_seen(&db, &seen_id).await
    });

    tracing::info!(user_id = %user_id, "User logged in");
    Ok(Json(SessionResponse { user, token }))
}
