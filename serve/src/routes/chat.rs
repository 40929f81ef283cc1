//! The streaming chat endpoint.
//!
//! Errors before the stream starts return an envelope with a 4xx/5xx
//! status; once streaming begins the status is already 200 and failures
//! arrive as a terminal `error` record.

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_stream::StreamExt;

use stream_event::to_json_line;
use weft::{Mode, OrchestratorError, TurnRequest};

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::response::{error_response, ApiResult};
use crate::routes::{de_id, de_opt_id};

#[derive(Debug, Deserialize)]
pub struct StreamChatParam {
    #[serde(rename = "conversationId", deserialize_with = "de_id")]
    pub conversation_id: i64,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "modelCode")]
    pub model_code: Option<String>,
    /// Accepted for UI compatibility; the model is resolved by code.
    #[serde(rename = "modelId", default, deserialize_with = "de_opt_id")]
    pub model_id: Option<i64>,
    #[serde(rename = "parentMessageId", default, deserialize_with = "de_opt_id")]
    pub parent_message_id: Option<i64>,
    #[serde(default)]
    pub regenerate: bool,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(rename = "knowledgeBaseIds", default)]
    pub knowledge_base_ids: Vec<i64>,
}

fn default_mode() -> String {
    "chat".to_string()
}

pub async fn stream_chat(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<StreamChatParam>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return error_response(OrchestratorError::Validation(rejection.body_text()))
        }
    };
    let mode: Mode = match payload.mode.parse() {
        Ok(mode) => mode,
        Err(e) => return error_response(OrchestratorError::Validation(e)),
    };
    let request = TurnRequest {
        conversation_id: payload.conversation_id,
        content: payload.content,
        model_code: payload.model_code,
        parent_message_id: payload.parent_message_id,
        regenerate: payload.regenerate,
        mode,
        knowledge_base_ids: payload.knowledge_base_ids,
    };

    let events = match state.orchestrator.stream_turn(&user, request).await {
        Ok(events) => events,
        Err(e) => return error_response(e),
    };

    let body = Body::from_stream(events.map(|event| {
        let line = to_json_line(&event)
            .unwrap_or_else(|e| format!("{{\"type\":\"error\",\"message\":\"{e}\",\"code\":\"SYS-500\"}}\n"));
        Ok::<_, std::convert::Infallible>(format!("data: {line}\n"))
    }));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

pub async fn health() -> Json<ApiResult<String>> {
    Json(ApiResult::ok("Chat service is healthy".to_string()))
}
