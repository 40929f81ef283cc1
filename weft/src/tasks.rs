//! Best-effort background work.
//!
//! The task runner owns work that must not block or fail a turn:
//! embedding writeback after a message persists, document ingest, and the
//! like. Jobs retry with exponential backoff, at most three attempts, and
//! are not cancelled by client disconnects.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::warn;

/// Upper bound on attempts per job.
pub const MAX_ATTEMPTS: u32 = 3;

/// Spawns retried, fire-and-forget jobs.
pub struct TaskRunner {
    base_delay: Duration,
    next_id: AtomicU64,
    active: Arc<DashMap<u64, String>>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::with_base_delay(Duration::from_millis(500))
    }

    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            base_delay,
            next_id: AtomicU64::new(1),
            active: Arc::new(DashMap::new()),
        }
    }

    /// Number of jobs currently in flight.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Runs `job` in the background, retrying on error with exponential
    /// backoff (base, 2·base, 4·base) up to [`MAX_ATTEMPTS`]. Failures
    /// are logged, never propagated.
    pub fn spawn<F, Fut, E>(&self, name: &str, job: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send,
        E: std::fmt::Display + Send,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let name = name.to_string();
        let base_delay = self.base_delay;
        let active = self.active.clone();
        active.insert(id, name.clone());
        tokio::spawn(async move {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match job().await {
                    Ok(()) => break,
                    Err(e) if attempt < MAX_ATTEMPTS => {
                        let delay = base_delay * 2u32.pow(attempt - 1);
                        warn!(task = %name, attempt, "background task failed, retrying: {e}");
                        tokio::time::sleep(delay).await;
                    }
                    Err(e) => {
                        warn!(task = %name, attempt, "background task gave up: {e}");
                        break;
                    }
                }
            }
            active.remove(&id);
        })
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}
