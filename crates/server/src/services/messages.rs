use sqlx::SqlitePool;
use std::collections::HashMap;

use murmur_shared::constants::{MAX_BATCH_STATUS_IDS, MAX_MESSAGE_PAGE_SIZE, MESSAGE_PAGE_SIZE};
use murmur_shared::validation::{validate_caption, validate_emoji, validate_message_content};

use crate::crypto::EncryptionManager;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{
    DeletedMessage, DeliveryStatus, MediaDescriptor, MessageOrder, MessageQuery, MessageRow,
    MessageType, MessageView, NewMessage, Page, Reaction, StatusChange,
};

use super::{participant_role, placeholders};

/// Forward-only upsert. An existing row only moves when the incoming status
/// is at least as far along and its timestamp is not older.
const UPSERT_STATUS: &str = r#"
INSERT INTO message_status (message_id, user_id, status, updated_at)
VALUES (?, ?, ?, ?)
ON CONFLICT(message_id, user_id) DO UPDATE SET
    status = excluded.status,
    updated_at = excluded.updated_at
WHERE excluded.updated_at >= message_status.updated_at
  AND (CASE excluded.status
         WHEN 'sending' THEN 0 WHEN 'sent' THEN 1 WHEN 'delivered' THEN 2 ELSE 3 END)
   >= (CASE message_status.status
         WHEN 'sending' THEN 0 WHEN 'sent' THEN 1 WHEN 'delivered' THEN 2 ELSE 3 END)"#;

impl Page {
    /// Clamp a raw query into a usable page. A negative offset is rejected.
    pub fn from_query(query: &MessageQuery) -> AppResult<Self> {
        let offset = query.offset.unwrap_or(0);
        if offset < 0 {
            return Err(AppError::BadRequest("offset must be non-negative".into()));
        }
        Ok(Self {
            limit: query
                .limit
                .unwrap_or(MESSAGE_PAGE_SIZE)
                .clamp(1, MAX_MESSAGE_PAGE_SIZE),
            offset,
            order: query.order.unwrap_or_default(),
        })
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: MESSAGE_PAGE_SIZE,
            offset: 0,
            order: MessageOrder::NewestFirst,
        }
    }
}

/// Lowest per-recipient status among the other participants. A recipient
/// without a row is still at `sent`.
pub fn aggregate_status(
    sender_id: &str,
    participants: &[String],
    statuses: &HashMap<&str, DeliveryStatus>,
) -> DeliveryStatus {
    let own = statuses
        .get(sender_id)
        .copied()
        .unwrap_or(DeliveryStatus::Sent);

    participants
        .iter()
        .filter(|u| u.as_str() != sender_id)
        .map(|u| {
            statuses
                .get(u.as_str())
                .copied()
                .unwrap_or(DeliveryStatus::Sent)
        })
        .min()
        .unwrap_or(own)
}

fn check_content(message_type: MessageType, content: &str) -> AppResult<()> {
    if message_type.requires_media() {
        validate_caption(content).map_err(AppError::BadRequest)
    } else {
        validate_message_content(content).map_err(AppError::BadRequest)
    }
}

fn check_media(message_type: MessageType, media: Option<&MediaDescriptor>) -> AppResult<()> {
    match media {
        None if message_type.requires_media() => Err(AppError::BadRequest(format!(
            "{} messages require media",
            message_type.as_str()
        ))),
        Some(m) if m.url.trim().is_empty() => {
            Err(AppError::BadRequest("Media url is required".into()))
        }
        Some(m) if m.size.is_some_and(|s| s < 0) || m.duration.is_some_and(|d| d < 0) => {
            Err(AppError::BadRequest("Media size and duration must be non-negative".into()))
        }
        _ => Ok(()),
    }
}

pub struct MessageStore {
    db: SqlitePool,
    crypto: EncryptionManager,
}

impl MessageStore {
    pub fn new(db: SqlitePool, crypto: EncryptionManager) -> Self {
        Self { db, crypto }
    }

    pub async fn create(&self, message: NewMessage) -> AppResult<MessageView> {
        check_content(message.message_type, &message.content)?;
        check_media(message.message_type, message.media.as_ref())?;

        let mut tx = self.db.begin().await?;

        if participant_role(&mut *tx, &message.conversation_id, &message.sender_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound);
        }

        if let Some(reply_to) = &message.reply_to_id {
            let target = sqlx::query_scalar::<_, String>(
                "SELECT conversation_id FROM messages WHERE id = ?",
            )
            .bind(reply_to)
            .fetch_optional(&mut *tx)
            .await?;
            if target.as_deref() != Some(message.conversation_id.as_str()) {
                return Err(AppError::BadRequest(
                    "Reply target must be a message in the same conversation".into(),
                ));
            }
        }

        let encrypted = self.crypto.encrypt_str(&message.content)?;
        let message_id = uuid::Uuid::new_v4().to_string();
        let now = db::now();
        let media = message.media.as_ref();

        sqlx::query(
            r#"INSERT INTO messages (id, conversation_id, sender_id, reply_to_id, content, message_type,
                   media_url, media_thumbnail_url, media_size, media_duration, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&message_id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.reply_to_id)
        .bind(&encrypted)
        .bind(message.message_type.as_str())
        .bind(media.map(|m| m.url.clone()))
        .bind(media.and_then(|m| m.thumbnail_url.clone()))
        .bind(media.and_then(|m| m.size))
        .bind(media.and_then(|m| m.duration))
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO message_status (message_id, user_id, status, updated_at) VALUES (?, ?, 'sent', ?)",
        )
        .bind(&message_id)
        .bind(&message.sender_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&message.conversation_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            message_id = %message_id,
            conversation_id = %message.conversation_id,
            sender_id = %message.sender_id,
            "Stored message"
        );

        Ok(MessageView {
            id: message_id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            reply_to_id: message.reply_to_id,
            content: Some(message.content),
            message_type: message.message_type,
            media: message.media,
            is_edited: false,
            is_deleted: false,
            created_at: now.clone(),
            updated_at: now,
            status: DeliveryStatus::Sent,
            read_by: Vec::new(),
            reactions: Vec::new(),
        })
    }

    /// Replace the content of a live message. Only its sender may.
    pub async fn update(
        &self,
        message_id: &str,
        sender_id: &str,
        content: &str,
    ) -> AppResult<MessageView> {
        let row = sqlx::query_as::<_, MessageRow>(
            "SELECT * FROM messages WHERE id = ? AND sender_id = ? AND is_deleted = 0",
        )
        .bind(message_id)
        .bind(sender_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)?;

        check_content(row.message_type.parse()?, content)?;
        let encrypted = self.crypto.encrypt_str(content)?;

        let result = sqlx::query(
            r#"UPDATE messages SET content = ?, is_edited = 1, updated_at = ?
               WHERE id = ? AND sender_id = ? AND is_deleted = 0"#,
        )
        .bind(&encrypted)
        .bind(db::now())
        .bind(message_id)
        .bind(sender_id)
        .execute(&self.db)
        .await?;

        // Deleted between the read and the write
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        self.load_view(&row.conversation_id, message_id).await
    }

    /// Soft-delete. Same authorisation as [`update`](Self::update).
    pub async fn delete(&self, message_id: &str, sender_id: &str) -> AppResult<DeletedMessage> {
        let conversation_id = sqlx::query_scalar::<_, String>(
            "SELECT conversation_id FROM messages WHERE id = ? AND sender_id = ? AND is_deleted = 0",
        )
        .bind(message_id)
        .bind(sender_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)?;

        let result = sqlx::query(
            "UPDATE messages SET is_deleted = 1, updated_at = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(db::now())
        .bind(message_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }

        tracing::debug!(message_id = %message_id, sender_id = %sender_id, "Deleted message");

        Ok(DeletedMessage {
            id: message_id.to_string(),
            conversation_id,
        })
    }

    /// One message as `reader` sees it.
    pub async fn get(&self, message_id: &str, reader_id: &str) -> AppResult<MessageView> {
        let conversation_id = self.visible_conversation(message_id, reader_id).await?;
        self.load_view(&conversation_id, message_id).await
    }

    pub async fn list_for_conversation(
        &self,
        conversation_id: &str,
        reader_id: &str,
        page: Page,
    ) -> AppResult<Vec<MessageView>> {
        if participant_role(&self.db, conversation_id, reader_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound);
        }
        if page.offset < 0 {
            return Err(AppError::BadRequest("offset must be non-negative".into()));
        }
        let limit = page.limit.clamp(1, MAX_MESSAGE_PAGE_SIZE);

        let sql = match page.order {
            MessageOrder::NewestFirst => {
                "SELECT * FROM messages WHERE conversation_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
            }
            MessageOrder::OldestFirst => {
                "SELECT * FROM messages WHERE conversation_id = ? ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?"
            }
        };

        let rows = sqlx::query_as::<_, MessageRow>(sql)
            .bind(conversation_id)
            .bind(limit)
            .bind(page.offset)
            .fetch_all(&self.db)
            .await?;

        self.decorate(conversation_id, rows).await
    }

    /// Record `user_id`'s status for one message and return what is now stored.
    pub async fn update_status(
        &self,
        message_id: &str,
        user_id: &str,
        status: DeliveryStatus,
    ) -> AppResult<StatusChange> {
        let conversation_id = self.visible_conversation(message_id, user_id).await?;

        sqlx::query(UPSERT_STATUS)
            .bind(message_id)
            .bind(user_id)
            .bind(status.as_str())
            .bind(db::now())
            .execute(&self.db)
            .await?;

        self.stored_status(&self.db, message_id, &conversation_id, user_id)
            .await
    }

    /// Apply one status to many messages in a single transaction. Ids the
    /// user cannot see are skipped.
    pub async fn batch_update_status(
        &self,
        message_ids: &[String],
        user_id: &str,
        status: DeliveryStatus,
    ) -> AppResult<Vec<StatusChange>> {
        if message_ids.len() > MAX_BATCH_STATUS_IDS {
            return Err(AppError::BadRequest(format!(
                "At most {MAX_BATCH_STATUS_IDS} messages per batch"
            )));
        }

        let now = db::now();
        let mut applied = Vec::with_capacity(message_ids.len());
        let mut tx = self.db.begin().await?;

        for message_id in message_ids {
            if applied
                .iter()
                .any(|c: &StatusChange| &c.message_id == message_id)
            {
                continue;
            }

            let conversation_id = sqlx::query_scalar::<_, String>(
                r#"SELECT m.conversation_id FROM messages m
                   INNER JOIN conversation_participants p
                       ON p.conversation_id = m.conversation_id AND p.user_id = ?
                   WHERE m.id = ? AND m.is_deleted = 0"#,
            )
            .bind(user_id)
            .bind(message_id)
            .fetch_optional(&mut *tx)
            .await?;

            let Some(conversation_id) = conversation_id else {
                continue;
            };

            sqlx::query(UPSERT_STATUS)
                .bind(message_id)
                .bind(user_id)
                .bind(status.as_str())
                .bind(&now)
                .execute(&mut *tx)
                .await?;

            applied.push(
                self.stored_status(&mut *tx, message_id, &conversation_id, user_id)
                    .await?,
            );
        }

        tx.commit().await?;
        Ok(applied)
    }

    /// Returns `true` when the reaction is new.
    pub async fn add_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> AppResult<bool> {
        validate_emoji(emoji).map_err(AppError::BadRequest)?;
        self.visible_conversation(message_id, user_id).await?;

        let result = sqlx::query(
            r#"INSERT INTO message_reactions (message_id, user_id, emoji, created_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(message_id, user_id, emoji) DO NOTHING"#,
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji.trim())
        .bind(db::now())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns `true` when a reaction was actually removed.
    pub async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> AppResult<bool> {
        self.visible_conversation(message_id, user_id).await?;

        let result = sqlx::query(
            "DELETE FROM message_reactions WHERE message_id = ? AND user_id = ? AND emoji = ?",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji.trim())
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Conversation of a live message the user participates in.
    async fn visible_conversation(&self, message_id: &str, user_id: &str) -> AppResult<String> {
        sqlx::query_scalar::<_, String>(
            r#"SELECT m.conversation_id FROM messages m
               INNER JOIN conversation_participants p
                   ON p.conversation_id = m.conversation_id AND p.user_id = ?
               WHERE m.id = ? AND m.is_deleted = 0"#,
        )
        .bind(user_id)
        .bind(message_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)
    }

    async fn stored_status<'e, E>(
        &self,
        executor: E,
        message_id: &str,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<StatusChange>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let (status, updated_at) = sqlx::query_as::<_, (String, String)>(
            "SELECT status, updated_at FROM message_status WHERE message_id = ? AND user_id = ?",
        )
        .bind(message_id)
        .bind(user_id)
        .fetch_one(executor)
        .await?;

        Ok(StatusChange {
            message_id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            status: status.parse()?,
            updated_at,
        })
    }

    async fn load_view(&self, conversation_id: &str, message_id: &str) -> AppResult<MessageView> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AppError::NotFound)?;

        self.decorate(conversation_id, vec![row])
            .await?
            .pop()
            .ok_or(AppError::NotFound)
    }

    /// Decrypt rows and attach aggregate status, readers and reactions.
    async fn decorate(
        &self,
        conversation_id: &str,
        rows: Vec<MessageRow>,
    ) -> AppResult<Vec<MessageView>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let participants = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await?;

        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        let in_clause = placeholders(ids.len());

        let status_sql = format!(
            "SELECT message_id, user_id, status FROM message_status WHERE message_id IN ({in_clause}) ORDER BY updated_at ASC"
        );
        let mut status_query = sqlx::query_as::<_, (String, String, String)>(&status_sql);
        for id in &ids {
            status_query = status_query.bind(*id);
        }
        let status_rows = status_query.fetch_all(&self.db).await?;

        let reaction_sql = format!(
            "SELECT message_id, user_id, emoji, created_at FROM message_reactions WHERE message_id IN ({in_clause}) ORDER BY created_at ASC"
        );
        let mut reaction_query = sqlx::query_as::<_, Reaction>(&reaction_sql);
        for id in &ids {
            reaction_query = reaction_query.bind(*id);
        }
        let reaction_rows = reaction_query.fetch_all(&self.db).await?;

        let mut statuses: HashMap<&str, Vec<(&str, DeliveryStatus)>> = HashMap::new();
        for (message_id, user_id, status) in &status_rows {
            statuses
                .entry(message_id.as_str())
                .or_default()
                .push((user_id.as_str(), status.parse()?));
        }

        let mut reactions: HashMap<String, Vec<Reaction>> = HashMap::new();
        for reaction in reaction_rows {
            reactions
                .entry(reaction.message_id.clone())
                .or_default()
                .push(reaction);
        }

        let mut views = Vec::with_capacity(rows.len());
        for row in &rows {
            let per_user = statuses.get(row.id.as_str());
            let by_user: HashMap<&str, DeliveryStatus> =
                per_user.into_iter().flatten().copied().collect();
            let read_by = per_user
                .into_iter()
                .flatten()
                .filter(|(_, s)| *s == DeliveryStatus::Read)
                .map(|(u, _)| u.to_string())
                .collect();

            let content = if row.is_deleted {
                None
            } else {
                Some(self.crypto.decrypt_str(&row.content)?)
            };

            views.push(MessageView {
                id: row.id.clone(),
                conversation_id: row.conversation_id.clone(),
                sender_id: row.sender_id.clone(),
                reply_to_id: row.reply_to_id.clone(),
                content,
                message_type: row.message_type.parse()?,
                media: row.media(),
                is_edited: row.is_edited,
                is_deleted: row.is_deleted,
                created_at: row.created_at.clone(),
                updated_at: row.updated_at.clone(),
                status: aggregate_status(&row.sender_id, &participants, &by_user),
                read_by,
                reactions: reactions.remove(&row.id).unwrap_or_default(),
            });
        }

        Ok(views)
    }
}
