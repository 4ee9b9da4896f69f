use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// The entity is absent or the caller may not see it. Callers cannot
    /// tell the two apart.
    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("a direct conversation already exists between these users")]
    DuplicateConversation,

    #[error("user is already a participant")]
    DuplicateParticipant,

    #[error("user is not a participant")]
    NotAParticipant,

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid message type: {0}")]
    InvalidMessageType(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::NotAParticipant => StatusCode::FORBIDDEN,
            AppError::DuplicateConversation
            | AppError::DuplicateParticipant
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InvalidRole(_)
            | AppError::InvalidStatus(_)
            | AppError::InvalidMessageType(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::EncryptionFailed
            | AppError::DecryptionFailed
            | AppError::Database(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to a client. Storage and crypto details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Database(_) => "Database error".into(),
            AppError::Internal(_) => "Internal error".into(),
            AppError::EncryptionFailed | AppError::DecryptionFailed => {
                "Content could not be processed".into()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(serde_json::json!({"error": self.public_message()})),
        )
            .into_response()
    }
}
