//! Bearer tokens: HS256 JWTs carrying user identity, expiry, and issuer.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "userName")]
    pub user_name: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    /// Unique per token; concurrent logins in the same second must not
    /// collide.
    pub jti: String,
}

/// Issues a token; returns `(token, expiry unix seconds)`.
pub fn issue_token(
    user_id: i64,
    user_name: &str,
    secret: &str,
    expire_minutes: i64,
    issuer: &str,
) -> Option<(String, i64)> {
    let now = Utc::now();
    let expiry = now + Duration::minutes(expire_minutes);
    let claims = Claims {
        sub: user_id.to_string(),
        user_id,
        user_name: user_name.to_string(),
        iat: now.timestamp(),
        exp: expiry.timestamp(),
        iss: issuer.to_string(),
        jti: uuid::Uuid::new_v4().simple().to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .ok()
    .map(|token| (token, expiry.timestamp()))
}

/// Verifies signature, expiry, and issuer; any failure is `None`.
pub fn decode_token(token: &str, secret: &str, issuer: &str) -> Option<Claims> {
    let mut validation = Validation::default();
    validation.set_issuer(&[issuer]);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .ok()
    .map(|data| data.claims)
}
