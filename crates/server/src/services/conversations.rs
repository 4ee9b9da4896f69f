use sqlx::SqlitePool;
use std::collections::HashMap;

use murmur_shared::constants::DERIVED_GROUP_NAME_LENGTH;
use murmur_shared::validation::{truncate_name, validate_group_name};

use crate::crypto::EncryptionManager;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::models::{
    ConversationDetail, ConversationKind, ConversationRow, ConversationSummary, MessagePreview,
    MessageRow, ParticipantRow, ParticipantView, ReadReceipt, Role,
};

use super::{conversation_kind, participant_role, placeholders};

/// Unordered pair key stored in `conversations.direct_key`.
pub fn direct_key(a: &str, b: &str) -> String {
    if a < b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

pub struct ConversationDirectory {
    db: SqlitePool,
    crypto: EncryptionManager,
}

impl ConversationDirectory {
    pub fn new(db: SqlitePool, crypto: EncryptionManager) -> Self {
        Self { db, crypto }
    }

    /// Create a direct conversation (exactly one other member) or a group.
    ///
    /// The conversation row and every participant row commit together.
    pub async fn create(
        &self,
        creator_id: &str,
        member_ids: &[String],
        name: Option<String>,
    ) -> AppResult<ConversationDetail> {
        let mut others: Vec<String> = Vec::new();
        for id in member_ids {
            let id = id.trim();
            if id.is_empty() || id == creator_id || others.iter().any(|o| o == id) {
                continue;
            }
            others.push(id.to_string());
        }
        if others.is_empty() {
            return Err(AppError::BadRequest(
                "At least one other member is required".into(),
            ));
        }

        let mut all_ids = Vec::with_capacity(others.len() + 1);
        all_ids.push(creator_id.to_string());
        all_ids.extend(others.iter().cloned());

        let handles = self.active_handles(&all_ids).await?;
        if handles.len() != all_ids.len() {
            return Err(AppError::NotFound);
        }

        let kind = if others.len() == 1 {
            ConversationKind::Direct
        } else {
            ConversationKind::Group
        };

        let (name, pair_key) = match kind {
            ConversationKind::Direct => {
                let key = direct_key(creator_id, &others[0]);
                let existing = sqlx::query_scalar::<_, String>(
                    "SELECT id FROM conversations WHERE direct_key = ?",
                )
                .bind(&key)
                .fetch_optional(&self.db)
                .await?;
                if existing.is_some() {
                    return Err(AppError::DuplicateConversation);
                }
                (None, Some(key))
            }
            ConversationKind::Group => {
                let explicit = name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string);
                let name = match explicit {
                    Some(n) => {
                        validate_group_name(&n).map_err(AppError::BadRequest)?;
                        n
                    }
                    None => {
                        let joined = all_ids
                            .iter()
                            .filter_map(|id| handles.get(id).map(String::as_str))
                            .collect::<Vec<_>>()
                            .join(", ");
                        truncate_name(&joined, DERIVED_GROUP_NAME_LENGTH)
                    }
                };
                (Some(name), None)
            }
        };

        let conversation_id = uuid::Uuid::new_v4().to_string();
        let now = db::now();

        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query(
            r#"INSERT INTO conversations (id, creator_id, kind, name, direct_key, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&conversation_id)
        .bind(creator_id)
        .bind(kind.as_str())
        .bind(&name)
        .bind(&pair_key)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(AppError::DuplicateConversation)
            }
            Err(e) => return Err(e.into()),
        }

        for user_id in &all_ids {
            let role = if kind == ConversationKind::Group && user_id == creator_id {
                Role::Owner
            } else {
                Role::Member
            };
            sqlx::query(
                r#"INSERT INTO conversation_participants (conversation_id, user_id, role, joined_at)
                   VALUES (?, ?, ?, ?)"#,
            )
            .bind(&conversation_id)
            .bind(user_id)
            .bind(role.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            conversation_id = %conversation_id,
            creator_id = %creator_id,
            kind = kind.as_str(),
            members = all_ids.len(),
            "Created conversation"
        );

        self.load_detail(&conversation_id).await
    }

    /// Conversation with resolved participants. Absent and not-a-participant
    /// both come back as `NotFound`.
    pub async fn get_by_id(
        &self,
        conversation_id: &str,
        requesting_user: &str,
    ) -> AppResult<ConversationDetail> {
        if participant_role(&self.db, conversation_id, requesting_user)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound);
        }
        self.load_detail(conversation_id).await
    }

    /// Every conversation the user is in, most recent activity first.
    pub async fn list_for_user(&self, user_id: &str) -> AppResult<Vec<ConversationSummary>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"SELECT c.id, c.creator_id, c.kind, c.name, c.created_at, c.updated_at
               FROM conversations c
               INNER JOIN conversation_participants p ON p.conversation_id = c.id
               WHERE p.user_id = ?"#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        let in_clause = placeholders(ids.len());

        // Newest live message per conversation
        let last_sql = format!(
            r#"SELECT * FROM (
                   SELECT m.*, ROW_NUMBER() OVER (
                       PARTITION BY m.conversation_id
                       ORDER BY m.created_at DESC, m.rowid DESC
                   ) AS rn
                   FROM messages m
                   WHERE m.conversation_id IN ({in_clause}) AND m.is_deleted = 0
               ) WHERE rn = 1"#
        );
        let mut last_query = sqlx::query_as::<_, MessageRow>(&last_sql);
        for id in &ids {
            last_query = last_query.bind(*id);
        }
        let mut previews: HashMap<String, MessagePreview> = HashMap::new();
        for m in last_query.fetch_all(&self.db).await? {
            previews.insert(
                m.conversation_id.clone(),
                MessagePreview {
                    content: self.crypto.decrypt_str(&m.content)?,
                    message_type: m.message_type.parse()?,
                    id: m.id,
                    sender_id: m.sender_id,
                    created_at: m.created_at,
                },
            );
        }

        let unread_sql = format!(
            r#"SELECT m.conversation_id, COUNT(*) FROM messages m
               WHERE m.conversation_id IN ({in_clause}) AND m.sender_id != ? AND m.is_deleted = 0
                 AND NOT EXISTS (
                     SELECT 1 FROM message_status s
                     WHERE s.message_id = m.id AND s.user_id = ? AND s.status = 'read'
                 )
               GROUP BY m.conversation_id"#
        );
        let mut unread_query = sqlx::query_as::<_, (String, i64)>(&unread_sql);
        for id in &ids {
            unread_query = unread_query.bind(*id);
        }
        let unread: HashMap<String, i64> = unread_query
            .bind(user_id)
            .bind(user_id)
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .collect();

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            result.push(ConversationSummary {
                kind: row.kind.parse()?,
                last_message: previews.remove(&row.id),
                unread_count: unread.get(&row.id).copied().unwrap_or(0),
                id: row.id,
                creator_id: row.creator_id,
                name: row.name,
                created_at: row.created_at,
                updated_at: row.updated_at,
            });
        }

        result.sort_by(|a, b| b.last_activity().cmp(a.last_activity()));
        Ok(result)
    }

    /// Advance the reader's marker and mark everything from others as read.
    pub async fn mark_read(&self, conversation_id: &str, user_id: &str) -> AppResult<ReadReceipt> {
        let mut tx = self.db.begin().await?;

        if participant_role(&mut *tx, conversation_id, user_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotAParticipant);
        }

        let read_at = db::now();

        sqlx::query(
            r#"UPDATE conversation_participants SET last_read_at = ?
               WHERE conversation_id = ? AND user_id = ?
                 AND (last_read_at IS NULL OR last_read_at < ?)"#,
        )
        .bind(&read_at)
        .bind(conversation_id)
        .bind(user_id)
        .bind(&read_at)
        .execute(&mut *tx)
        .await?;

        let message_ids = sqlx::query_scalar::<_, String>(
            r#"SELECT m.id FROM messages m
               WHERE m.conversation_id = ? AND m.sender_id != ? AND m.created_at <= ?
                 AND NOT EXISTS (
                     SELECT 1 FROM message_status s
                     WHERE s.message_id = m.id AND s.user_id = ? AND s.status = 'read'
                 )
               ORDER BY m.created_at ASC, m.rowid ASC"#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(&read_at)
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        for message_id in &message_ids {
            sqlx::query(
                r#"INSERT INTO message_status (message_id, user_id, status, updated_at)
                   VALUES (?, ?, 'read', ?)
                   ON CONFLICT(message_id, user_id)
                   DO UPDATE SET status = 'read', updated_at = excluded.updated_at"#,
            )
            .bind(message_id)
            .bind(user_id)
            .bind(&read_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(ReadReceipt {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            read_at,
            message_ids,
        })
    }

    pub async fn add_participant(
        &self,
        conversation_id: &str,
        actor_id: &str,
        target_id: &str,
        role: Option<Role>,
    ) -> AppResult<ParticipantView> {
        let role = role.unwrap_or(Role::Member);

        let mut tx = self.db.begin().await?;
        let actor_role = self.group_actor(&mut tx, conversation_id, actor_id).await?;

        if !actor_role.can_manage_members() {
            return Err(AppError::Forbidden(
                "Only admins and the owner can add participants".into(),
            ));
        }
        if role == Role::Owner {
            return Err(AppError::Forbidden(
                "The owner role cannot be assigned".into(),
            ));
        }
        if role == Role::Admin && !actor_role.can_change_roles() {
            return Err(AppError::Forbidden(
                "Only the owner can grant the admin role".into(),
            ));
        }

        let target_exists = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE id = ? AND is_active = 1",
        )
        .bind(target_id)
        .fetch_one(&mut *tx)
        .await?;
        if target_exists == 0 {
            return Err(AppError::NotFound);
        }

        if participant_role(&mut *tx, conversation_id, target_id)
            .await?
            .is_some()
        {
            return Err(AppError::DuplicateParticipant);
        }

        let inserted = sqlx::query(
            r#"INSERT INTO conversation_participants (conversation_id, user_id, role, joined_at)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(conversation_id)
        .bind(target_id)
        .bind(role.as_str())
        .bind(db::now())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(AppError::DuplicateParticipant)
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;

        tracing::info!(
            conversation_id = %conversation_id,
            actor_id = %actor_id,
            user_id = %target_id,
            role = %role,
            "Added participant"
        );

        self.load_participant(conversation_id, target_id).await
    }

    /// Remove `target_id` from a group. A participant other than the owner
    /// may always remove themselves.
    pub async fn remove_participant(
        &self,
        conversation_id: &str,
        actor_id: &str,
        target_id: &str,
    ) -> AppResult<()> {
        let mut tx = self.db.begin().await?;
        let actor_role = self.group_actor(&mut tx, conversation_id, actor_id).await?;

        let target_role = participant_role(&mut *tx, conversation_id, target_id)
            .await?
            .ok_or(AppError::NotAParticipant)?;

        if target_role == Role::Owner {
            return Err(AppError::Forbidden("The owner cannot be removed".into()));
        }
        if actor_id != target_id {
            if !actor_role.can_manage_members() {
                return Err(AppError::Forbidden(
                    "Only admins and the owner can remove participants".into(),
                ));
            }
            if target_role == Role::Admin && !actor_role.can_change_roles() {
                return Err(AppError::Forbidden(
                    "Only the owner can remove an admin".into(),
                ));
            }
        }

        sqlx::query(
            "DELETE FROM conversation_participants WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(conversation_id)
        .bind(target_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            conversation_id = %conversation_id,
            actor_id = %actor_id,
            user_id = %target_id,
            "Removed participant"
        );
        Ok(())
    }

    pub async fn update_role(
        &self,
        conversation_id: &str,
        actor_id: &str,
        target_id: &str,
        role: Role,
    ) -> AppResult<ParticipantView> {
        let mut tx = self.db.begin().await?;
        let actor_role = self.group_actor(&mut tx, conversation_id, actor_id).await?;

        if !actor_role.can_change_roles() {
            return Err(AppError::Forbidden("Only the owner can change roles".into()));
        }
        if role == Role::Owner {
            return Err(AppError::Forbidden(
                "The owner role cannot be reassigned".into(),
            ));
        }

        let target_role = participant_role(&mut *tx, conversation_id, target_id)
            .await?
            .ok_or(AppError::NotAParticipant)?;
        if target_role == Role::Owner {
            return Err(AppError::Forbidden("The owner's role cannot change".into()));
        }

        sqlx::query(
            "UPDATE conversation_participants SET role = ? WHERE conversation_id = ? AND user_id = ?",
        )
        .bind(role.as_str())
        .bind(conversation_id)
        .bind(target_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            conversation_id = %conversation_id,
            user_id = %target_id,
            role = %role,
            "Updated participant role"
        );

        self.load_participant(conversation_id, target_id).await
    }

    pub async fn participant_ids(&self, conversation_id: &str) -> AppResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM conversation_participants WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await?;
        Ok(ids)
    }

    /// Role of `actor_id` in a group conversation. Hides conversations the
    /// actor is not in and refuses direct ones.
    async fn group_actor(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        conversation_id: &str,
        actor_id: &str,
    ) -> AppResult<Role> {
        let kind = conversation_kind(&mut **tx, conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let actor_role = participant_role(&mut **tx, conversation_id, actor_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if kind != ConversationKind::Group {
            return Err(AppError::Forbidden(
                "Participants can only be changed in group conversations".into(),
            ));
        }
        Ok(actor_role)
    }

    async fn active_handles(&self, ids: &[String]) -> AppResult<HashMap<String, String>> {
        let sql = format!(
            "SELECT id, handle FROM users WHERE is_active = 1 AND id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query_as::<_, (String, String)>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.db).await?.into_iter().collect())
    }

    async fn load_detail(&self, conversation_id: &str) -> AppResult<ConversationDetail> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, creator_id, kind, name, created_at, updated_at FROM conversations WHERE id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotFound)?;

        let participants = sqlx::query_as::<_, ParticipantRow>(
            r#"SELECT p.user_id, u.handle, p.role, p.joined_at, p.last_read_at, u.is_online, u.last_seen_at
               FROM conversation_participants p
               INNER JOIN users u ON u.id = p.user_id
               WHERE p.conversation_id = ?
               ORDER BY p.joined_at ASC, u.handle ASC"#,
        )
        .bind(conversation_id)
        .fetch_all(&self.db)
        .await?
        .into_iter()
        .map(ParticipantView::try_from)
        .collect::<AppResult<Vec<_>>>()?;

        Ok(ConversationDetail {
            kind: row.kind.parse()?,
            id: row.id,
            creator_id: row.creator_id,
            name: row.name,
            created_at: row.created_at,
            updated_at: row.updated_at,
            participants,
        })
    }

    async fn load_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> AppResult<ParticipantView> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"SELECT p.user_id, u.handle, p.role, p.joined_at, p.last_read_at, u.is_online, u.last_seen_at
               FROM conversation_participants p
               INNER JOIN users u ON u.id = p.user_id
               WHERE p.conversation_id = ? AND p.user_id = ?"#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::NotAParticipant)?;
        row.try_into()
    }
}
