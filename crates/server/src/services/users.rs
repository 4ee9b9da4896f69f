use argon2::{PasswordHash, PasswordHasher, PasswordVerifier};
use sqlx::SqlitePool;

use crate::crypto::EncryptionManager;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{PublicUser, RegisterRequest, UserProfile, UserRow};

pub struct UserDirectory {
    db: SqlitePool,
    crypto: EncryptionManager,
}

impl UserDirectory {
    pub fn new(db: SqlitePool, crypto: EncryptionManager) -> Self {
        Self { db, crypto }
    }

    pub async fn register(&self, req: RegisterRequest) -> AppResult<UserProfile> {
        let handle = req.handle.trim().to_string();
        murmur_shared::validation::validate_handle(&handle).map_err(AppError::BadRequest)?;
        murmur_shared::validation::validate_password(&req.password)
            .map_err(AppError::BadRequest)?;

        let email = req
            .email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());
        let phone = req
            .phone
            .as_deref()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        let taken = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE handle = ?")
            .bind(&handle)
            .fetch_one(&self.db)
            .await?;
        if taken > 0 {
            return Err(AppError::Conflict("Handle already taken".into()));
        }

        let salt = argon2::password_hash::SaltString::generate(&mut rand::rngs::OsRng);
        let password_hash = argon2::Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| AppError::Internal(format!("password hashing: {e}")))?
            .to_string();

        let email_encrypted = self.crypto.encrypt_opt(email.as_deref())?;
        let phone_encrypted = self.crypto.encrypt_opt(phone.as_deref())?;

        let user_id = uuid::Uuid::new_v4().to_string();
        let now = db::now();

        let result = sqlx::query(
            r#"INSERT INTO users (id, handle, email_encrypted, phone_encrypted, password_hash, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&user_id)
        .bind(&handle)
        .bind(&email_encrypted)
        .bind(&phone_encrypted)
        .bind(&password_hash)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => {}
            // Lost a race with a concurrent registration of the same handle
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(AppError::Conflict("Handle already taken".into()))
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %user_id, handle = %handle, "Registered user");

        Ok(UserProfile {
            id: user_id,
            handle,
            email,
            phone,
            is_online: false,
            last_seen_at: None,
            created_at: now,
        })
    }

    /// Check a handle/password pair and return the user id.
    ///
    /// Unknown handle, wrong password and deactivated account all look the same.
    pub async fn authenticate(&self, handle: &str, password: &str) -> AppResult<String> {
        let row = sqlx::query_as::<_, (String, String, bool)>(
            "SELECT id, password_hash, is_active FROM users WHERE handle = ?",
        )
        .bind(handle.trim())
        .fetch_optional(&self.db)
        .await?;

        let (user_id, stored_hash, is_active) = row.ok_or(AppError::Unauthorized)?;
        if !is_active {
            return Err(AppError::Unauthorized);
        }

        let parsed = PasswordHash::new(&stored_hash)
            .map_err(|e| AppError::Internal(format!("stored password hash: {e}")))?;
        argon2::Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AppError::Unauthorized)?;

        Ok(user_id)
    }

    pub async fn profile(&self, user_id: &str) -> AppResult<UserProfile> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT * FROM users WHERE id = ? AND is_active = 1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)?;

        Ok(UserProfile {
            email: self.crypto.decrypt_opt(row.email_encrypted.as_deref())?,
            phone: self.crypto.decrypt_opt(row.phone_encrypted.as_deref())?,
            id: row.id,
            handle: row.handle,
            is_online: row.is_online,
            last_seen_at: row.last_seen_at,
            created_at: row.created_at,
        })
    }

    /// Another user's public projection.
    pub async fn public(&self, user_id: &str) -> AppResult<PublicUser> {
        sqlx::query_as::<_, PublicUser>(
            "SELECT id, handle, is_online, last_seen_at FROM users WHERE id = ? AND is_active = 1",
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)
    }

    pub async fn is_active(&self, user_id: &str) -> AppResult<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE id = ? AND is_active = 1",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(count > 0)
    }

    /// Soft-deactivate. The row is kept.
    pub async fn deactivate(&self, user_id: &str) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE users SET is_active = 0, is_online = 0, updated_at = ? WHERE id = ? AND is_active = 1",
        )
        .bind(db::now())
        .bind(user_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        tracing::info!(user_id = %user_id, "Deactivated user");
        Ok(())
    }
}

/// Update presence and stamp last-seen. Runs off the request path.
pub async fn set_presence(db: &SqlitePool, user_id: &str, online: bool) -> AppResult<()> {
    sqlx::query("UPDATE users SET is_online = ?, last_seen_at = ? WHERE id = ?")
        .bind(online)
        .bind(db::now())
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn touch_last_seen(db: &SqlitePool, user_id: &str) -> AppResult<()> {
    sqlx::query("UPDATE users SET last_seen_at = ? WHERE id = ?")
        .bind(db::now())
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(())
}
