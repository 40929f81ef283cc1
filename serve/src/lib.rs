//! HTTP surface: the streaming chat endpoint plus the thin read
//! projections the UI needs (branch siblings, history, branch pointer,
//! conversation CRUD).

pub mod app;
pub mod auth;
pub mod response;
pub mod routes;

pub use app::{router, AppState};
