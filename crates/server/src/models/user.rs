use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub handle: String,
    pub email_encrypted: Option<String>,
    pub phone_encrypted: Option<String>,
    pub password_hash: String,
    pub is_online: bool,
    pub last_seen_at: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A user's own view of their account, contact fields decrypted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub handle: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_online: bool,
    pub last_seen_at: Option<String>,
    pub created_at: String,
}

/// What other users may see.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub handle: String,
    pub is_online: bool,
    pub last_seen_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: UserProfile,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub handle: String,
    pub password: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub handle: String,
    pub password: String,
}
