//! Append-only checkpoint chain, one per thread (= conversation).
//!
//! Checkpoints form a linked list rooted at the thread's first checkpoint;
//! forking writes a new child of an existing checkpoint and never rewrites
//! anything. There is no delete, rename, or reparent.
//!
//! The sibling search works off the anchor rule: ascend from a checkpoint
//! to the nearest ancestor with strictly smaller `message_count` (the true
//! fork point), then enumerate the anchor's descendant leaves with a larger
//! count. Intermediate checkpoints whose count matches their parent never
//! surface as branches.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::state::GraphState;
use crate::store::now_ms;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for CheckpointError {
    fn from(e: sqlx::Error) -> Self {
        CheckpointError::Storage(e.to_string())
    }
}

/// One checkpoint as read back from the store.
#[derive(Clone, Debug)]
pub struct CheckpointTuple<S> {
    pub checkpoint_id: i64,
    pub parent_checkpoint_id: Option<i64>,
    pub message_count: i64,
    pub state: S,
}

/// Sibling branches of a checkpoint, for branch navigation.
#[derive(Clone, Debug, PartialEq)]
pub struct SiblingCheckpoints {
    /// 0-based index of the queried checkpoint among its siblings.
    pub current: usize,
    pub siblings: Vec<i64>,
}

/// Saves and loads graph states keyed by `(thread_id, checkpoint_id)`.
///
/// `checkpoint_id` is monotonic within a thread; writes per thread are
/// sequential (the client serialises turns per conversation).
#[async_trait]
pub trait Checkpointer<S: GraphState>: Send + Sync {
    /// Appends a checkpoint as a child of `parent` and returns its id.
    async fn put(
        &self,
        thread_id: i64,
        parent: Option<i64>,
        state: &S,
    ) -> Result<i64, CheckpointError>;

    async fn get(
        &self,
        thread_id: i64,
        checkpoint_id: i64,
    ) -> Result<Option<CheckpointTuple<S>>, CheckpointError>;

    /// Most recently written checkpoint of the thread.
    async fn get_latest(
        &self,
        thread_id: i64,
    ) -> Result<Option<CheckpointTuple<S>>, CheckpointError>;

    /// All checkpoints of the thread in creation order; `limit` keeps the
    /// most recent n.
    async fn list(
        &self,
        thread_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple<S>>, CheckpointError>;

    /// Deletes the whole thread (conversation deletion cascade).
    async fn delete_thread(&self, thread_id: i64) -> Result<(), CheckpointError>;

    /// The true fork point of `checkpoint_id`: the nearest ancestor with a
    /// strictly smaller message count, or the checkpoint itself at the
    /// root.
    async fn find_fork_anchor(
        &self,
        thread_id: i64,
        checkpoint_id: i64,
    ) -> Result<i64, CheckpointError> {
        let chain = self.list(thread_id, None).await?;
        let by_id: HashMap<i64, &CheckpointTuple<S>> =
            chain.iter().map(|t| (t.checkpoint_id, t)).collect();
        let start = by_id.get(&checkpoint_id).ok_or_else(|| {
            CheckpointError::NotFound(format!("checkpoint {checkpoint_id}"))
        })?;
        let mut cursor = *start;
        while let Some(parent_id) = cursor.parent_checkpoint_id {
            let parent = by_id.get(&parent_id).ok_or_else(|| {
                CheckpointError::Storage(format!("dangling parent {parent_id}"))
            })?;
            if parent.message_count < start.message_count {
                return Ok(parent.checkpoint_id);
            }
            cursor = *parent;
        }
        Ok(cursor.checkpoint_id)
    }

    /// Sibling branches of `checkpoint_id`: descendant leaves of its fork
    /// anchor whose message count exceeds the anchor's.
    async fn sibling_checkpoints(
        &self,
        thread_id: i64,
        checkpoint_id: i64,
    ) -> Result<SiblingCheckpoints, CheckpointError> {
        let anchor_id = self.find_fork_anchor(thread_id, checkpoint_id).await?;
        let chain = self.list(thread_id, None).await?;
        let by_id: HashMap<i64, &CheckpointTuple<S>> =
            chain.iter().map(|t| (t.checkpoint_id, t)).collect();
        let anchor_count = by_id[&anchor_id].message_count;

        let descends_from_anchor = |mut id: i64| -> bool {
            loop {
                if id == anchor_id {
                    return true;
                }
                match by_id.get(&id).and_then(|t| t.parent_checkpoint_id) {
                    Some(parent) => id = parent,
                    None => return false,
                }
            }
        };

        let candidates: Vec<i64> = chain
            .iter()
            .filter(|t| {
                t.checkpoint_id != anchor_id
                    && t.message_count > anchor_count
                    && descends_from_anchor(t.checkpoint_id)
            })
            .map(|t| t.checkpoint_id)
            .collect();
        let candidate_parents: Vec<Option<i64>> = candidates
            .iter()
            .map(|id| by_id[id].parent_checkpoint_id)
            .collect();
        let siblings: Vec<i64> = candidates
            .iter()
            .copied()
            .filter(|id| !candidate_parents.contains(&Some(*id)))
            .collect();

        let current = siblings
            .iter()
            .position(|id| *id == checkpoint_id)
            .unwrap_or(0);
        Ok(SiblingCheckpoints { current, siblings })
    }
}

/// SQLite-backed checkpointer over the shared pool.
///
/// `put` runs in one transaction: the next monotonic id is read and the row
/// inserted under the same connection.
pub struct SqlCheckpointStore<S> {
    pool: SqlitePool,
    _state: PhantomData<fn() -> S>,
}

impl<S> SqlCheckpointStore<S> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _state: PhantomData,
        }
    }
}

fn decode_row<S: GraphState>(
    checkpoint_id: i64,
    parent_checkpoint_id: Option<i64>,
    message_count: i64,
    payload: &[u8],
) -> Result<CheckpointTuple<S>, CheckpointError> {
    let state = serde_json::from_slice(payload)
        .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
    Ok(CheckpointTuple {
        checkpoint_id,
        parent_checkpoint_id,
        message_count,
        state,
    })
}

#[async_trait]
impl<S: GraphState> Checkpointer<S> for SqlCheckpointStore<S> {
    async fn put(
        &self,
        thread_id: i64,
        parent: Option<i64>,
        state: &S,
    ) -> Result<i64, CheckpointError> {
        let payload = serde_json::to_vec(state)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let message_count = state.message_count() as i64;

        let mut tx = self.pool.begin().await?;
        let next_id: i64 = sqlx::query(
            "SELECT COALESCE(MAX(checkpoint_id), 0) + 1 FROM checkpoints WHERE thread_id = ?",
        )
        .bind(thread_id)
        .fetch_one(&mut *tx)
        .await?
        .try_get(0)?;
        sqlx::query(
            "INSERT INTO checkpoints \
             (thread_id, checkpoint_id, parent_checkpoint_id, message_count, state, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(thread_id)
        .bind(next_id)
        .bind(parent)
        .bind(message_count)
        .bind(payload)
        .bind(now_ms())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(next_id)
    }

    async fn get(
        &self,
        thread_id: i64,
        checkpoint_id: i64,
    ) -> Result<Option<CheckpointTuple<S>>, CheckpointError> {
        let row = sqlx::query(
            "SELECT checkpoint_id, parent_checkpoint_id, message_count, state \
             FROM checkpoints WHERE thread_id = ? AND checkpoint_id = ?",
        )
        .bind(thread_id)
        .bind(checkpoint_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            None => Ok(None),
            Some(row) => Ok(Some(decode_row(
                row.try_get(0)?,
                row.try_get(1)?,
                row.try_get(2)?,
                row.try_get::<Vec<u8>, _>(3)?.as_slice(),
            )?)),
        }
    }

    async fn get_latest(
        &self,
        thread_id: i64,
    ) -> Result<Option<CheckpointTuple<S>>, CheckpointError> {
        let row = sqlx::query(
            "SELECT checkpoint_id, parent_checkpoint_id, message_count, state \
             FROM checkpoints WHERE thread_id = ? ORDER BY checkpoint_id DESC LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            None => Ok(None),
            Some(row) => Ok(Some(decode_row(
                row.try_get(0)?,
                row.try_get(1)?,
                row.try_get(2)?,
                row.try_get::<Vec<u8>, _>(3)?.as_slice(),
            )?)),
        }
    }

    async fn list(
        &self,
        thread_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple<S>>, CheckpointError> {
        let rows = sqlx::query(
            "SELECT checkpoint_id, parent_checkpoint_id, message_count, state \
             FROM checkpoints WHERE thread_id = ? ORDER BY checkpoint_id ASC",
        )
        .bind(thread_id)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(decode_row(
                row.try_get(0)?,
                row.try_get(1)?,
                row.try_get(2)?,
                row.try_get::<Vec<u8>, _>(3)?.as_slice(),
            )?);
        }
        if let Some(n) = limit {
            if out.len() > n {
                out = out.split_off(out.len() - n);
            }
        }
        Ok(out)
    }

    async fn delete_thread(&self, thread_id: i64) -> Result<(), CheckpointError> {
        sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory checkpointer for tests and single-process runs.
pub struct MemorySaver<S> {
    threads: Mutex<HashMap<i64, Vec<CheckpointTuple<S>>>>,
}

impl<S> MemorySaver<S> {
    pub fn new() -> Self {
        Self {
            threads: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> Default for MemorySaver<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: GraphState> Checkpointer<S> for MemorySaver<S> {
    async fn put(
        &self,
        thread_id: i64,
        parent: Option<i64>,
        state: &S,
    ) -> Result<i64, CheckpointError> {
        let mut guard = self.threads.lock().expect("saver lock");
        let chain = guard.entry(thread_id).or_default();
        let id = chain.last().map(|t| t.checkpoint_id + 1).unwrap_or(1);
        chain.push(CheckpointTuple {
            checkpoint_id: id,
            parent_checkpoint_id: parent,
            message_count: state.message_count() as i64,
            state: state.clone(),
        });
        Ok(id)
    }

    async fn get(
        &self,
        thread_id: i64,
        checkpoint_id: i64,
    ) -> Result<Option<CheckpointTuple<S>>, CheckpointError> {
        let guard = self.threads.lock().expect("saver lock");
        Ok(guard
            .get(&thread_id)
            .and_then(|c| c.iter().find(|t| t.checkpoint_id == checkpoint_id))
            .cloned())
    }

    async fn get_latest(
        &self,
        thread_id: i64,
    ) -> Result<Option<CheckpointTuple<S>>, CheckpointError> {
        let guard = self.threads.lock().expect("saver lock");
        Ok(guard.get(&thread_id).and_then(|c| c.last()).cloned())
    }

    async fn list(
        &self,
        thread_id: i64,
        limit: Option<usize>,
    ) -> Result<Vec<CheckpointTuple<S>>, CheckpointError> {
        let guard = self.threads.lock().expect("saver lock");
        let mut out = guard.get(&thread_id).cloned().unwrap_or_default();
        if let Some(n) = limit {
            if out.len() > n {
                out = out.split_off(out.len() - n);
            }
        }
        Ok(out)
    }

    async fn delete_thread(&self, thread_id: i64) -> Result<(), CheckpointError> {
        self.threads
            .lock()
            .expect("saver lock")
            .remove(&thread_id);
        Ok(())
    }
}
