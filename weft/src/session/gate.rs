//! The gate itself: token in, user out; plus session issue/invalidate.

use std::sync::Arc;

use env_config::Settings;

use crate::session::{
    decode_token, issue_token, SessionError, SessionRecord, SessionStore, SessionUser,
};
use crate::store::now_ms;

/// Validates bearer credentials against the session store and issues new
/// sessions under the concurrent-login cap.
pub struct SessionGate {
    store: Arc<dyn SessionStore>,
    jwt_secret: String,
    jwt_issuer: String,
    jwt_expire_minutes: i64,
    max_login_num: usize,
}

impl SessionGate {
    pub fn new(store: Arc<dyn SessionStore>, settings: &Settings) -> Self {
        Self {
            store,
            jwt_secret: settings.jwt_secret.clone(),
            jwt_issuer: settings.jwt_issuer.clone(),
            jwt_expire_minutes: settings.jwt_expire_minutes,
            max_login_num: settings.max_login_num,
        }
    }

    /// `authenticate(token) → user | Unauthorized`. Signature, expiry, and
    /// session lookup all collapse into the same Unauthorized; a down
    /// backend is Unavailable (retryable), never "allow".
    pub async fn authenticate(&self, token: &str) -> Result<SessionUser, SessionError> {
        let claims = decode_token(token, &self.jwt_secret, &self.jwt_issuer)
            .ok_or(SessionError::Unauthorized)?;
        let record = self
            .store
            .load_session(claims.user_id, token)
            .await?
            .ok_or(SessionError::Unauthorized)?;
        Ok(SessionUser::from(&record))
    }

    /// Issues a token and stores the session atomically; returns the
    /// token. Older sessions beyond the cap are evicted by the store.
    pub async fn create_session(
        &self,
        user_id: i64,
        user_name: &str,
    ) -> Result<String, SessionError> {
        let (token, _expiry) = issue_token(
            user_id,
            user_name,
            &self.jwt_secret,
            self.jwt_expire_minutes,
            &self.jwt_issuer,
        )
        .ok_or_else(|| SessionError::Internal("token issue failed".into()))?;
        let record = SessionRecord {
            id: user_id,
            user_name: user_name.to_string(),
            token: token.clone(),
            login_time: now_ms(),
        };
        let ttl = (self.jwt_expire_minutes.max(1) as u64) * 60;
        self.store
            .save_session(&record, ttl, self.max_login_num)
            .await?;
        Ok(token)
    }

    pub async fn invalidate(&self, user_id: i64, token: &str) -> Result<(), SessionError> {
        self.store.remove_session(user_id, token).await
    }
}
