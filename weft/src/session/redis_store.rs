//! Redis-backed session store.
//!
//! `save_session` is one server-side Lua script; any client-side
//! composition of the same steps would admit cap violations under
//! concurrent logins.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::session::{
    index_key, session_key, SessionError, SessionRecord, SessionStore,
};

/// KEYS[1] = index, KEYS[2] = new detail key.
/// ARGV[1] = score (ms), ARGV[2] = ttl secs, ARGV[3] = max logins,
/// ARGV[4] = detail payload. Returns the number of evicted sessions.
const SAVE_SESSION_SCRIPT: &str = r#"
local members = redis.call('ZRANGE', KEYS[1], 0, -1)
for _, member in ipairs(members) do
  if redis.call('EXISTS', member) == 0 then
    redis.call('ZREM', KEYS[1], member)
  end
end
redis.call('SET', KEYS[2], ARGV[4], 'EX', tonumber(ARGV[2]))
redis.call('ZADD', KEYS[1], tonumber(ARGV[1]), KEYS[2])
redis.call('EXPIRE', KEYS[1], tonumber(ARGV[2]))
local evicted = 0
local over = redis.call('ZCARD', KEYS[1]) - tonumber(ARGV[3])
if over > 0 then
  local victims = redis.call('ZRANGE', KEYS[1], 0, over - 1)
  for _, victim in ipairs(victims) do
    redis.call('DEL', victim)
    redis.call('ZREM', KEYS[1], victim)
    evicted = evicted + 1
  end
end
return evicted
"#;

pub struct RedisSessionStore {
    conn: ConnectionManager,
    script: redis::Script,
}

impl RedisSessionStore {
    pub async fn connect(url: &str) -> Result<Self, SessionError> {
        let client =
            redis::Client::open(url).map_err(|e| SessionError::Unavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| SessionError::Unavailable(e.to_string()))?;
        Ok(Self {
            conn,
            script: redis::Script::new(SAVE_SESSION_SCRIPT),
        })
    }
}

fn unavailable(e: redis::RedisError) -> SessionError {
    SessionError::Unavailable(e.to_string())
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn save_session(
        &self,
        record: &SessionRecord,
        ttl_secs: u64,
        max_login_num: usize,
    ) -> Result<usize, SessionError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| SessionError::Internal(e.to_string()))?;
        let mut conn = self.conn.clone();
        let evicted: i64 = self
            .script
            .key(index_key(record.id))
            .key(session_key(record.id, &record.token))
            .arg(record.login_time)
            .arg(ttl_secs)
            .arg(max_login_num as i64)
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(evicted.max(0) as usize)
    }

    async fn load_session(
        &self,
        user_id: i64,
        token: &str,
    ) -> Result<Option<SessionRecord>, SessionError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(session_key(user_id, token))
            .await
            .map_err(unavailable)?;
        Ok(raw.and_then(|blob| serde_json::from_str(&blob).ok()))
    }

    async fn remove_session(&self, user_id: i64, token: &str) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        let detail = session_key(user_id, token);
        let mut pipe = redis::pipe();
        pipe.del(&detail).zrem(index_key(user_id), &detail);
        let _: () = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: the script text covers each atomic step — stale
    /// sweep, insert, TTLs on both keys, overflow eviction with count.
    #[test]
    fn script_covers_contract() {
        assert!(SAVE_SESSION_SCRIPT.contains("EXISTS"));
        assert!(SAVE_SESSION_SCRIPT.contains("'SET', KEYS[2]"));
        assert!(SAVE_SESSION_SCRIPT.contains("'ZADD', KEYS[1]"));
        assert!(SAVE_SESSION_SCRIPT.contains("'EXPIRE', KEYS[1]"));
        assert!(SAVE_SESSION_SCRIPT.contains("ZCARD"));
        assert!(SAVE_SESSION_SCRIPT.contains("return evicted"));
    }
}
