//! Relational persistence: one pooled SQLite handle shared by the
//! conversation store, the checkpoint store, and the embedding store.
//!
//! Pool contract: min 2 / max 10 connections, 5-minute idle cap, health
//! check on borrow (`test_before_acquire`).

pub mod checkpoint;
pub mod conversation;
pub mod embedding;

use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// Millisecond wall clock used for `create_time` columns and sort keys.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Opens the shared pool and ensures the schema exists.
pub async fn connect(
    database_url: &str,
    min_connections: u32,
    max_connections: u32,
    idle_secs: u64,
) -> Result<SqlitePool, StoreError> {
    let options: SqliteConnectOptions = database_url
        .parse::<SqliteConnectOptions>()
        .map_err(sqlx::Error::from)?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .min_connections(min_connections)
        .max_connections(max_connections)
        .idle_timeout(Duration::from_secs(idle_secs))
        .test_before_acquire(true)
        .connect_with(options)
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Creates all tables and indexes if absent.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            title TEXT NOT NULL DEFAULT '',
            model_code TEXT,
            last_message_id INTEGER,
            last_message_at INTEGER,
            current_message_id INTEGER,
            create_time INTEGER NOT NULL,
            update_time INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL,
            parent_id INTEGER,
            checkpoint_id INTEGER,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'TEXT',
            model_code TEXT,
            token_count INTEGER NOT NULL DEFAULT 0,
            create_time INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages (conversation_id)",
        "CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages (parent_id)",
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            thread_id INTEGER NOT NULL,
            checkpoint_id INTEGER NOT NULL,
            parent_checkpoint_id INTEGER,
            message_count INTEGER NOT NULL,
            state BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (thread_id, checkpoint_id)
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_checkpoints_parent ON checkpoints (thread_id, parent_checkpoint_id)",
        r#"
        CREATE TABLE IF NOT EXISTS message_embeddings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id INTEGER NOT NULL,
            conversation_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            create_time INTEGER NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_message_embeddings_conversation ON message_embeddings (conversation_id)",
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            knowledge_base_id INTEGER NOT NULL,
            document_id INTEGER NOT NULL,
            file_name TEXT,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL,
            metadata TEXT
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_kb ON document_chunks (knowledge_base_id)",
    ];
    for sql in statements {
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    // One connection keeps an in-memory database shared across all uses.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    init_schema(&pool).await.expect("init schema");
    pool
}
