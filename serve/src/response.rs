//! Uniform JSON envelope for non-streaming responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use weft::OrchestratorError;

/// `{success, code, message, data}` — the envelope every non-streaming
/// endpoint returns.
#[derive(Clone, Debug, Serialize)]
pub struct ApiResult<T: Serialize> {
    pub success: bool,
    pub code: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            code: "OK".into(),
            message: String::new(),
            data: Some(data),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }
}

/// HTTP status for an orchestrator error, per the error table.
pub fn status_for(error: &OrchestratorError) -> StatusCode {
    match error.code() {
        "AUTH-401" => StatusCode::UNAUTHORIZED,
        "CONV-403" => StatusCode::FORBIDDEN,
        "CONV-404" => StatusCode::NOT_FOUND,
        "REQ-422" => StatusCode::UNPROCESSABLE_ENTITY,
        "PROVIDER-502" => StatusCode::BAD_GATEWAY,
        "AUTH-503" | "STREAM-503" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Pre-stream error → status + envelope. Internal kinds keep a generic
/// message.
pub fn error_response(error: OrchestratorError) -> Response {
    let status = status_for(&error);
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        "internal error".to_string()
    } else {
        error.to_string()
    };
    (
        status,
        Json(ApiResult::<()>::error(error.code(), message)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: error kinds map onto their HTTP statuses; internal
    /// errors do not leak their message.
    #[test]
    fn status_mapping() {
        assert_eq!(
            status_for(&OrchestratorError::Unauthorized),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&OrchestratorError::Forbidden("c".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&OrchestratorError::Validation("f".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&OrchestratorError::Internal("secret detail".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let response = error_response(OrchestratorError::Internal("secret detail".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    /// **Scenario**: the envelope shape carries success/code/message/data.
    #[test]
    fn envelope_shape() {
        let ok = serde_json::to_value(ApiResult::ok(42)).unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["code"], "OK");
        assert_eq!(ok["data"], 42);
        let err = serde_json::to_value(ApiResult::<()>::error("CONV-403", "会话不存在或无权限"))
            .unwrap();
        assert_eq!(err["success"], false);
        assert_eq!(err["data"], serde_json::Value::Null);
    }
}
