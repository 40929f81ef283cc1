//! Conversation rows and the per-conversation message tree.
//!
//! Messages form a parent-pointer tree: siblings (same `parent_id`) are
//! regeneration alternatives at the same conversational position. The
//! conversation row tracks `last_message_id`, `last_message_at`, and
//! `current_message_id` (the user-selected branch tip); `persist_message`
//! updates all three atomically with the insert.

use sqlx::{Row, SqlitePool};

use crate::store::{now_ms, StoreError};

#[derive(Clone, Debug, PartialEq)]
pub struct ConversationRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub model_code: Option<String>,
    pub last_message_id: Option<i64>,
    pub last_message_at: Option<i64>,
    pub current_message_id: Option<i64>,
    pub create_time: i64,
    pub update_time: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub parent_id: Option<i64>,
    pub checkpoint_id: Option<i64>,
    pub role: String,
    pub content: String,
    pub content_type: String,
    pub model_code: Option<String>,
    pub token_count: i64,
    pub create_time: i64,
}

/// Everything needed to insert one message.
#[derive(Clone, Debug, Default)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub parent_id: Option<i64>,
    pub checkpoint_id: Option<i64>,
    pub role: String,
    pub content: String,
    pub content_type: String,
    pub model_code: Option<String>,
    pub token_count: i64,
}

/// Sibling set of one message plus the 0-based index of the queried id.
#[derive(Clone, Debug, PartialEq)]
pub struct SiblingMessages {
    pub current: usize,
    pub siblings: Vec<MessageRow>,
}

fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MessageRow, sqlx::Error> {
    Ok(MessageRow {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        parent_id: row.try_get("parent_id")?,
        checkpoint_id: row.try_get("checkpoint_id")?,
        role: row.try_get("role")?,
        content: row.try_get("content")?,
        content_type: row.try_get("content_type")?,
        model_code: row.try_get("model_code")?,
        token_count: row.try_get("token_count")?,
        create_time: row.try_get("create_time")?,
    })
}

fn conversation_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ConversationRow, sqlx::Error> {
    Ok(ConversationRow {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        model_code: row.try_get("model_code")?,
        last_message_id: row.try_get("last_message_id")?,
        last_message_at: row.try_get("last_message_at")?,
        current_message_id: row.try_get("current_message_id")?,
        create_time: row.try_get("create_time")?,
        update_time: row.try_get("update_time")?,
    })
}

#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_conversation(
        &self,
        user_id: i64,
        title: Option<&str>,
        model_code: Option<&str>,
    ) -> Result<i64, StoreError> {
        let now = now_ms();
        let result = sqlx::query(
            "INSERT INTO conversations (user_id, title, model_code, create_time, update_time) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(title.unwrap_or(""))
        .bind(model_code)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Returns the conversation or Forbidden. Every orchestrator entry
    /// point calls this first; missing and not-owned are indistinguishable.
    pub async fn ensure_owner(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> Result<ConversationRow, StoreError> {
        let row = sqlx::query("SELECT * FROM conversations WHERE id = ? AND user_id = ?")
            .bind(conversation_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(conversation_from_row(&row)?),
            None => Err(StoreError::Forbidden(format!(
                "conversation {conversation_id}"
            ))),
        }
    }

    pub async fn list_conversations(
        &self,
        user_id: i64,
    ) -> Result<Vec<ConversationRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM conversations WHERE user_id = ? ORDER BY update_time DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| conversation_from_row(r).map_err(StoreError::from))
            .collect()
    }

    pub async fn set_title(&self, conversation_id: i64, title: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE conversations SET title = ?, update_time = ? WHERE id = ?")
            .bind(title)
            .bind(now_ms())
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Inserts a message and atomically moves the conversation's
    /// `last_message_id`, `last_message_at`, and `current_message_id` onto
    /// the new row.
    pub async fn persist_message(&self, new: NewMessage) -> Result<MessageRow, StoreError> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO messages \
             (conversation_id, parent_id, checkpoint_id, role, content, content_type, model_code, token_count, create_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.conversation_id)
        .bind(new.parent_id)
        .bind(new.checkpoint_id)
        .bind(&new.role)
        .bind(&new.content)
        .bind(if new.content_type.is_empty() {
            "TEXT"
        } else {
            new.content_type.as_str()
        })
        .bind(&new.model_code)
        .bind(new.token_count)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();
        sqlx::query(
            "UPDATE conversations \
             SET last_message_id = ?, last_message_at = ?, current_message_id = ?, update_time = ? \
             WHERE id = ?",
        )
        .bind(id)
        .bind(now)
        .bind(id)
        .bind(now)
        .bind(new.conversation_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(MessageRow {
            id,
            conversation_id: new.conversation_id,
            parent_id: new.parent_id,
            checkpoint_id: new.checkpoint_id,
            role: new.role,
            content: new.content,
            content_type: if new.content_type.is_empty() {
                "TEXT".into()
            } else {
                new.content_type
            },
            model_code: new.model_code,
            token_count: new.token_count,
            create_time: now,
        })
    }

    pub async fn get_message(&self, message_id: i64) -> Result<MessageRow, StoreError> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(message_from_row(&row)?),
            None => Err(StoreError::NotFound(format!("message {message_id}"))),
        }
    }

    /// All messages sharing the given message's `parent_id`, ordered by
    /// `(create_time, id)` ascending, plus the queried id's 0-based index.
    /// The root (null parent) returns itself alone.
    pub async fn get_sibling_messages(
        &self,
        message_id: i64,
    ) -> Result<SiblingMessages, StoreError> {
        let message = self.get_message(message_id).await?;
        let rows = match message.parent_id {
            None => {
                sqlx::query(
                    "SELECT * FROM messages \
                     WHERE conversation_id = ? AND parent_id IS NULL \
                     ORDER BY create_time ASC, id ASC",
                )
                .bind(message.conversation_id)
                .fetch_all(&self.pool)
                .await?
            }
            Some(parent_id) => {
                sqlx::query(
                    "SELECT * FROM messages \
                     WHERE conversation_id = ? AND parent_id = ? \
                     ORDER BY create_time ASC, id ASC",
                )
                .bind(message.conversation_id)
                .bind(parent_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        let siblings: Vec<MessageRow> = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<_, _>>()?;
        let current = siblings
            .iter()
            .position(|m| m.id == message_id)
            .unwrap_or(0);
        Ok(SiblingMessages { current, siblings })
    }

    /// Direct children of a message, ordered by `(create_time, id)`.
    pub async fn children(
        &self,
        conversation_id: i64,
        parent_id: i64,
    ) -> Result<Vec<MessageRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM messages \
             WHERE conversation_id = ? AND parent_id = ? \
             ORDER BY create_time ASC, id ASC",
        )
        .bind(conversation_id)
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| message_from_row(r).map_err(StoreError::from))
            .collect()
    }

    /// Records the user's branch choice; history loads retrace from this
    /// pointer.
    pub async fn set_current_message(
        &self,
        conversation_id: i64,
        user_id: i64,
        message_id: i64,
    ) -> Result<(), StoreError> {
        self.ensure_owner(conversation_id, user_id).await?;
        let message = self.get_message(message_id).await?;
        if message.conversation_id != conversation_id {
            return Err(StoreError::NotFound(format!(
                "message {message_id} in conversation {conversation_id}"
            )));
        }
        sqlx::query(
            "UPDATE conversations SET current_message_id = ?, update_time = ? WHERE id = ?",
        )
        .bind(message_id)
        .bind(now_ms())
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Full message set plus the current branch pointer. Linearisation is
    /// on the caller via [`linearize`].
    pub async fn history(
        &self,
        user_id: i64,
        conversation_id: i64,
    ) -> Result<(Vec<MessageRow>, Option<i64>), StoreError> {
        let conversation = self.ensure_owner(conversation_id, user_id).await?;
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY create_time ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        let messages = rows
            .iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((messages, conversation.current_message_id))
    }

    /// Deletes the conversation, its message subtree, and its embeddings.
    /// The checkpoint thread is dropped by the caller alongside.
    pub async fn delete_conversation(
        &self,
        user_id: i64,
        conversation_id: i64,
    ) -> Result<(), StoreError> {
        self.ensure_owner(conversation_id, user_id).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM message_embeddings WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Linearises a message set along the branch pointer: retrace
/// `current_message_id` upward via `parent_id` to the root, then reverse.
/// With no pointer, the newest message (by `(create_time, id)`) is the
/// default leaf.
pub fn linearize(messages: &[MessageRow], current: Option<i64>) -> Vec<MessageRow> {
    if messages.is_empty() {
        return Vec::new();
    }
    let leaf = current
        .and_then(|id| messages.iter().find(|m| m.id == id))
        .or_else(|| messages.iter().max_by_key(|m| (m.create_time, m.id)));
    let Some(leaf) = leaf else {
        return Vec::new();
    };
    let mut path = Vec::new();
    let mut cursor = Some(leaf);
    while let Some(m) = cursor {
        path.push(m.clone());
        cursor = m
            .parent_id
            .and_then(|pid| messages.iter().find(|c| c.id == pid));
    }
    path.reverse();
    path
}
