//! Conversation projections: create, modify, list, history, delete.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use weft::{Checkpointer, OrchestratorError};

use crate::app::AppState;
use crate::auth::CurrentUser;
use crate::response::{error_response, ApiResult};
use crate::routes::branch::MessageVo;

#[derive(Deserialize)]
pub struct CreateParam {
    pub title: Option<String>,
    #[serde(rename = "modelCode")]
    pub model_code: Option<String>,
}

#[derive(Serialize)]
pub struct ConversationVo {
    pub id: i64,
    pub title: String,
    #[serde(rename = "modelCode")]
    pub model_code: Option<String>,
    #[serde(rename = "lastMessageId")]
    pub last_message_id: Option<i64>,
    #[serde(rename = "lastMessageAt")]
    pub last_message_at: Option<i64>,
    #[serde(rename = "currentMessageId")]
    pub current_message_id: Option<i64>,
    #[serde(rename = "createTime")]
    pub create_time: i64,
}

#[derive(Serialize)]
pub struct HistoryVo {
    pub messages: Vec<MessageVo>,
    #[serde(rename = "currentMessageId")]
    pub current_message_id: Option<i64>,
}

pub async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<CreateParam>, JsonRejection>,
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
        .create_conversation(
            user.id,
            payload.title.as_deref(),
            payload.model_code.as_deref(),
        )
        .await
    {
        Ok(id) => Json(ApiResult::ok(id)).into_response(),
        Err(e) => error_response(OrchestratorError::from(e)),
    }
}

pub async fn list(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Response {
    match state
        .orchestrator
        .conversations()
        .list_conversations(user.id)
        .await
    {
        Ok(rows) => {
            let vos: Vec<ConversationVo> = rows
                .iter()
                .map(|c| ConversationVo {
                    id: c.id,
                    title: c.title.clone(),
                    model_code: c.model_code.clone(),
                    last_message_id: c.last_message_id,
                    last_message_at: c.last_message_at,
                    current_message_id: c.current_message_id,
                    create_time: c.create_time,
                })
                .collect();
            Json(ApiResult::ok(vos)).into_response()
        }
        Err(e) => error_response(OrchestratorError::from(e)),
    }
}

/// Full message set plus the branch pointer; the client linearises on
/// demand.
pub async fn history(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(conversation_id): Path<i64>,
) -> Response {
    match state
        .orchestrator
        .conversations()
        .history(user.id, conversation_id)
        .await
    {
        Ok((messages, current_message_id)) => Json(ApiResult::ok(HistoryVo {
            messages: messages.iter().map(MessageVo::from).collect(),
            current_message_id,
        }))
        .into_response(),
        Err(e) => error_response(OrchestratorError::from(e)),
    }
}

#[derive(Deserialize)]
pub struct ModifyParam {
    #[serde(rename = "conversationId", deserialize_with = "crate::routes::de_id")]
    pub conversation_id: i64,
    pub title: String,
}

pub async fn modify(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<ModifyParam>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            return error_response(OrchestratorError::Validation(rejection.body_text()))
        }
    };
    let conversations = state.orchestrator.conversations();
    if let Err(e) = conversations
        .ensure_owner(payload.conversation_id, user.id)
        .await
    {
        return error_response(OrchestratorError::from(e));
    }
    match conversations
        .set_title(payload.conversation_id, &payload.title)
        .await
    {
        Ok(()) => Json(ApiResult::ok(payload.conversation_id)).into_response(),
        Err(e) => error_response(OrchestratorError::from(e)),
    }
}

/// Deletes the conversation, its message subtree, and its checkpoint
/// thread.
pub async fn remove(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(conversation_id): Path<i64>,
) -> Response {
    if let Err(e) = state
        .orchestrator
        .conversations()
        .delete_conversation(user.id, conversation_id)
        .await
    {
        return error_response(OrchestratorError::from(e));
    }
    if let Err(e) = state
        .orchestrator
        .checkpoints()
        .delete_thread(conversation_id)
        .await
    {
        warn!(conversation_id, "checkpoint thread delete failed: {e}");
    }
    Json(ApiResult::ok(conversation_id)).into_response()
}
