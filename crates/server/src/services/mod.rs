pub mod conversations;
pub mod messages;
pub mod users;

pub use conversations::ConversationDirectory;
pub use messages::MessageStore;
pub use users::UserDirectory;

use crate::error::AppResult;
use crate::models::{ConversationKind, Role};

/// Role of `user_id` in the conversation, `None` when they are not in it.
pub(crate) async fn participant_role<'e, E>(
    executor: E,
    conversation_id: &str,
    user_id: &str,
) -> AppResult<Option<Role>>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let role = sqlx::query_scalar::<_, String>(
        "SELECT role FROM conversation_participants WHERE conversation_id = ? AND user_id = ?",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?;

    role.map(|r| r.parse()).transpose()
}

pub(crate) async fn conversation_kind<'e, E>(
    executor: E,
    conversation_id: &str,
) -> AppResult<Option<ConversationKind>>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let kind = sqlx::query_scalar::<_, String>("SELECT kind FROM conversations WHERE id = ?")
        .bind(conversation_id)
        .fetch_optional(executor)
        .await?;

    kind.map(|k| k.parse()).transpose()
}

/// `?,?,?` for an `IN (...)` clause of `n` bound values.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}
