//! Axum app: shared state and the route table.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use weft::{Orchestrator, SessionGate};

use crate::routes;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub gate: Arc<SessionGate>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat/stream", post(routes::chat::stream_chat))
        .route("/chat/health", get(routes::chat::health))
        .route("/branch/siblings/:message_id", get(routes::branch::siblings))
        .route("/branch/select", post(routes::branch::select))
        .route("/conversation/create", post(routes::conversation::create))
        .route("/conversation/modify", post(routes::conversation::modify))
        .route("/conversation/list", get(routes::conversation::list))
        .route(
            "/conversation/:conversation_id/history",
            get(routes::conversation::history),
        )
        .route(
            "/conversation/:conversation_id",
            delete(routes::conversation::remove),
        )
        .with_state(state)
}
