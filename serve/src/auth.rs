//! Bearer-token extractor: every handler that takes [`CurrentUser`] goes
//! through the session gate first.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use weft::{SessionError, SessionUser};

use crate::app::AppState;
use crate::response::ApiResult;

pub struct CurrentUser(pub SessionUser);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ApiResult::<()>::error("AUTH-401", "unauthorized")),
    )
        .into_response()
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(parts) else {
            return Err(unauthorized());
        };
        match state.gate.authenticate(token).await {
            Ok(user) => Ok(CurrentUser(user)),
            Err(SessionError::Unavailable(_)) => Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResult::<()>::error(
                    "AUTH-503",
                    "session backend unavailable",
                )),
            )
                .into_response()),
            Err(_) => Err(unauthorized()),
        }
    }
}
