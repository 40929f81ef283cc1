//! In-memory session store implementing the same atomic contract as the
//! Redis script, under a single mutex.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::session::{SessionError, SessionRecord, SessionStore};

struct UserSessions {
    /// token → score (login millis); the index half of the layout.
    index: Vec<(String, i64)>,
    /// token → (detail blob, expiry); the detail half.
    details: HashMap<String, (SessionRecord, Instant)>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    users: Mutex<HashMap<i64, UserSessions>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save_session(
        &self,
        record: &SessionRecord,
        ttl_secs: u64,
        max_login_num: usize,
    ) -> Result<usize, SessionError> {
        let mut users = self.users.lock().expect("session lock");
        let sessions = users.entry(record.id).or_insert_with(|| UserSessions {
            index: Vec::new(),
            details: HashMap::new(),
        });
        let now = Instant::now();

        // Sweep index entries whose detail has expired.
        sessions
            .details
            .retain(|_, (_, expires)| *expires > now);
        let details = &sessions.details;
        sessions.index.retain(|(token, _)| details.contains_key(token));

        // Insert the new session.
        let expires = now + Duration::from_secs(ttl_secs);
        sessions
            .details
            .insert(record.token.clone(), (record.clone(), expires));
        sessions.index.retain(|(token, _)| token != &record.token);
        sessions.index.push((record.token.clone(), record.login_time));
        sessions.index.sort_by_key(|(_, score)| *score);

        // Evict lowest-score members beyond the cap.
        let mut evicted = 0;
        while sessions.index.len() > max_login_num {
            let (token, _) = sessions.index.remove(0);
            sessions.details.remove(&token);
            evicted += 1;
        }
        Ok(evicted)
    }

    async fn load_session(
        &self,
        user_id: i64,
        token: &str,
    ) -> Result<Option<SessionRecord>, SessionError> {
        let users = self.users.lock().expect("session lock");
        Ok(users.get(&user_id).and_then(|sessions| {
            sessions
                .details
                .get(token)
                .filter(|(_, expires)| *expires > Instant::now())
                .map(|(record, _)| record.clone())
        }))
    }

    async fn remove_session(&self, user_id: i64, token: &str) -> Result<(), SessionError> {
        let mut users = self.users.lock().expect("session lock");
        if let Some(sessions) = users.get_mut(&user_id) {
            sessions.details.remove(token);
            sessions.index.retain(|(t, _)| t != token);
        }
        Ok(())
    }
}
