//! Vector rows: message embeddings and knowledge-base document chunks.
//!
//! Vectors are stored as little-endian f32 blobs; similarity is computed
//! in process. Writes are best-effort (queued on the task runner); every
//! read path tolerates absence.

use sqlx::{Row, SqlitePool};

use crate::store::{now_ms, StoreError};

#[derive(Clone, Debug)]
pub struct MessageEmbeddingRow {
    pub message_id: i64,
    pub conversation_id: i64,
    pub role: String,
    pub content: String,
    pub vector: Vec<f32>,
}

#[derive(Clone, Debug)]
pub struct ChunkRow {
    pub id: i64,
    pub knowledge_base_id: i64,
    pub document_id: i64,
    pub file_name: Option<String>,
    pub chunk_index: i64,
    pub content: String,
    pub vector: Vec<f32>,
    pub metadata: Option<String>,
}

/// Encodes a vector as little-endian f32 bytes.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decodes little-endian f32 bytes; trailing partial floats are dropped.
pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[derive(Clone)]
pub struct EmbeddingStore {
    pool: SqlitePool,
}

impl EmbeddingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_message_embedding(
        &self,
        message_id: i64,
        conversation_id: i64,
        user_id: i64,
        role: &str,
        content: &str,
        vector: &[f32],
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO message_embeddings \
             (message_id, conversation_id, user_id, role, content, embedding, create_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message_id)
        .bind(conversation_id)
        .bind(user_id)
        .bind(role)
        .bind(content)
        .bind(vector_to_blob(vector))
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All embedded messages of one conversation.
    pub async fn message_candidates(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<MessageEmbeddingRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT message_id, conversation_id, role, content, embedding \
             FROM message_embeddings WHERE conversation_id = ? ORDER BY id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(MessageEmbeddingRow {
                    message_id: row.try_get(0)?,
                    conversation_id: row.try_get(1)?,
                    role: row.try_get(2)?,
                    content: row.try_get(3)?,
                    vector: blob_to_vector(&row.try_get::<Vec<u8>, _>(4)?),
                })
            })
            .collect()
    }

    pub async fn insert_chunk(
        &self,
        knowledge_base_id: i64,
        document_id: i64,
        file_name: Option<&str>,
        chunk_index: i64,
        content: &str,
        vector: &[f32],
        metadata: Option<&str>,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO document_chunks \
             (knowledge_base_id, document_id, file_name, chunk_index, content, embedding, metadata) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(knowledge_base_id)
        .bind(document_id)
        .bind(file_name)
        .bind(chunk_index)
        .bind(content)
        .bind(vector_to_blob(vector))
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// All chunks of the given knowledge bases; empty kb set yields no
    /// rows.
    pub async fn chunks_for_knowledge_bases(
        &self,
        knowledge_base_ids: &[i64],
    ) -> Result<Vec<ChunkRow>, StoreError> {
        if knowledge_base_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; knowledge_base_ids.len()].join(", ");
        let sql = format!(
            "SELECT id, knowledge_base_id, document_id, file_name, chunk_index, content, embedding, metadata \
             FROM document_chunks WHERE knowledge_base_id IN ({placeholders}) ORDER BY id ASC"
        );
        let mut query = sqlx::query(&sql);
        for id in knowledge_base_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                Ok(ChunkRow {
                    id: row.try_get(0)?,
                    knowledge_base_id: row.try_get(1)?,
                    document_id: row.try_get(2)?,
                    file_name: row.try_get(3)?,
                    chunk_index: row.try_get(4)?,
                    content: row.try_get(5)?,
                    vector: blob_to_vector(&row.try_get::<Vec<u8>, _>(6)?),
                    metadata: row.try_get(7)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_pool;

    /// **Scenario**: the blob codec round-trips vectors and drops trailing
    /// partial floats.
    #[test]
    fn blob_codec_round_trip() {
        let v = vec![0.0_f32, -1.5, 3.25];
        assert_eq!(blob_to_vector(&vector_to_blob(&v)), v);
        let mut blob = vector_to_blob(&v);
        blob.push(0xff);
        assert_eq!(blob_to_vector(&blob), v);
    }

    /// **Scenario**: message embeddings are scoped to their conversation.
    #[tokio::test]
    async fn message_candidates_scoped() {
        let store = EmbeddingStore::new(test_pool().await);
        store
            .insert_message_embedding(1, 100, 1, "user", "hello", &[1.0, 0.0])
            .await
            .unwrap();
        store
            .insert_message_embedding(2, 200, 1, "user", "elsewhere", &[0.0, 1.0])
            .await
            .unwrap();
        let rows = store.message_candidates(100).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "hello");
        assert_eq!(rows[0].vector, vec![1.0, 0.0]);
    }

    /// **Scenario**: chunk lookup filters by kb-id set; an empty set reads
    /// nothing.
    #[tokio::test]
    async fn chunks_filtered_by_kb() {
        let store = EmbeddingStore::new(test_pool().await);
        store
            .insert_chunk(10, 1, Some("a.pdf"), 0, "alpha", &[1.0], None)
            .await
            .unwrap();
        store
            .insert_chunk(20, 2, Some("b.pdf"), 0, "beta", &[0.5], Some("{}"))
            .await
            .unwrap();

        assert!(store
            .chunks_for_knowledge_bases(&[])
            .await
            .unwrap()
            .is_empty());
        let rows = store.chunks_for_knowledge_bases(&[10]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "alpha");
        let rows = store.chunks_for_knowledge_bases(&[10, 20]).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
