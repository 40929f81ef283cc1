//! Session gate: bearer-token authentication backed by a two-key session
//! layout (detail blob + per-user sorted-set index).
//!
//! The index and detail keys are mutated ONLY through one atomic
//! operation ([`SessionStore::save_session`]) that sweeps stale index
//! entries, inserts the new token, refreshes TTLs, and evicts beyond
//! `max_login_num` — a login storm can never leave the index over the
//! cap. [`RedisSessionStore`] runs it as a server-side Lua script;
//! [`MemorySessionStore`] implements the identical contract under one
//! mutex for tests and single-process runs.

mod gate;
mod jwt;
mod memory;
mod redis_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use gate::SessionGate;
pub use jwt::{decode_token, issue_token, Claims};
pub use memory::MemorySessionStore;
pub use redis_store::RedisSessionStore;

#[derive(Error, Debug)]
pub enum SessionError {
    /// Signature, expiry, or session-miss; never says which.
    #[error("unauthorized")]
    Unauthorized,
    /// Backend unreachable; retryable, never falls back to "allow".
    #[error("session backend unavailable: {0}")]
    Unavailable(String),
    #[error("internal: {0}")]
    Internal(String),
}

/// Detail key: `agent:user:{uid}:session:{token}` (the braces are a
/// cluster hash tag, kept from the original key format).
pub fn session_key(user_id: i64, token: &str) -> String {
    format!("agent:user:{{{user_id}}}:session:{token}")
}

/// Index key: `agent:user:{uid}` → sorted set of detail keys scored by
/// login millis.
pub fn index_key(user_id: i64) -> String {
    format!("agent:user:{{{user_id}}}")
}

/// Profile snapshot stored in the session detail blob.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    #[serde(rename = "userName")]
    pub user_name: String,
    pub token: String,
    #[serde(rename = "loginTime")]
    pub login_time: i64,
}

/// The resolved caller, as seen by the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionUser {
    pub id: i64,
    pub user_name: String,
}

impl From<&SessionRecord> for SessionUser {
    fn from(r: &SessionRecord) -> Self {
        SessionUser {
            id: r.id,
            user_name: r.user_name.clone(),
        }
    }
}

/// Two-key session storage; see the module docs for the atomicity
/// contract.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Atomic sweep + insert + TTL refresh + overflow eviction. Returns
    /// how many sessions were evicted.
    async fn save_session(
        &self,
        record: &SessionRecord,
        ttl_secs: u64,
        max_login_num: usize,
    ) -> Result<usize, SessionError>;

    async fn load_session(
        &self,
        user_id: i64,
        token: &str,
    ) -> Result<Option<SessionRecord>, SessionError>;

    async fn remove_session(&self, user_id: i64, token: &str) -> Result<(), SessionError>;
}
