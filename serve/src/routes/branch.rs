//! Branch navigation: sibling lookup and the branch pointer.
//!
//! Sibling queries answer the UI's "1/N" selector from the message tree
//! (the authoritative structure for branches).

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use weft::{MessageRow, OrchestratorError};

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::response::{error_response, ApiResult};
use crate::routes::de_id;

#[derive(Serialize)]
pub struct MessageVo {
    pub id: i64,
    #[serde(rename = "conversationId")]
    pub conversation_id: i64,
    #[serde(rename = "parentId")]
    pub parent_id: Option<i64>,
    #[serde(rename = "checkpointId")]
    pub checkpoint_id: Option<i64>,
    pub role: String,
    pub content: String,
    #[serde(rename = "contentType")]
    pub content_type: String,
    #[serde(rename = "tokenCount")]
    pub token_count: i64,
    #[serde(rename = "createTime")]
    pub create_time: i64,
}

impl From<&MessageRow> for MessageVo {
    fn from(m: &MessageRow) -> Self {
        MessageVo {
            id: m.id,
            conversation_id: m.conversation_id,
            parent_id: m.parent_id,
            checkpoint_id: m.checkpoint_id,
            role: m.role.clone(),
            content: m.content.clone(),
            content_type: m.content_type.clone(),
            token_count: m.token_count,
            create_time: m.create_time,
        }
    }
}

#[derive(Serialize)]
pub struct SiblingsVo {
    pub current: usize,
    pub total: usize,
    pub siblings: Vec<MessageVo>,
}

pub async fn siblings(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(message_id): Path<i64>,
) -> Response {
    let conversations = state.orchestrator.conversations();
    let message = match conversations.get_message(message_id).await {
        Ok(m) => m,
        Err(e) => return error_response(OrchestratorError::from(e)),
    };
    if let Err(e) = conversations
        .ensure_owner(message.conversation_id, user.id)
        .await
    {
        return error_response(OrchestratorError::from(e));
    }
    match conversations.get_sibling_messages(message_id).await {
        Ok(view) => Json(ApiResult::ok(SiblingsVo {
            current: view.current,
            total: view.siblings.len(),
            siblings: view.siblings.iter().map(MessageVo::from).collect(),
        }))
        .into_response(),
        Err(e) => error_response(OrchestratorError::from(e)),
    }
}

#[derive(Deserialize)]
pub struct SelectParam {
    #[serde(rename = "conversationId", deserialize_with = "de_id")]
    pub conversation_id: i64,
    #[serde(rename = "messageId", deserialize_with = "de_id")]
    pub message_id: i64,
}

pub async fn select(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<SelectParam>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return error_response(OrchestratorError::Validation(rejection.body_text()))
        }
    };
    match state
        .orchestrator
        .conversations()
        .set_current_message(payload.conversation_id, user.id, payload.message_id)
        .await
    {
        Ok(()) => Json(ApiResult::ok(payload.message_id)).into_response(),
        Err(e) => error_response(OrchestratorError::from(e)),
    }
}
