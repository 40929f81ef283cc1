//! Orchestrator-level error: every failure a turn can surface, each with a
//! short stable code for the HTTP envelope and the `error` stream record.
//!
//! Layer-local errors (store, checkpoint, session, provider, …) live next to
//! their layers and convert into [`OrchestratorError`] at the orchestrator
//! boundary. Recoverable-locally means retrieval and tool failures; those
//! never reach this type from inside a turn.

use thiserror::Error;

use crate::llm::ProviderError;
use crate::session::SessionError;
use crate::store::checkpoint::CheckpointError;
use crate::store::StoreError;

/// Failure of one orchestrator operation.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Bearer credential rejected; never says which check failed.
    #[error("unauthorized")]
    Unauthorized,
    /// The caller does not own the conversation.
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("checkpoint: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("store: {0}")]
    Store(StoreError),
    #[error("session: {0}")]
    Session(SessionError),
    /// The transport could not keep up with the executor.
    #[error("stream back-pressure: {0}")]
    BackPressure(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Short stable code carried in envelopes and `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "AUTH-401",
            Self::Forbidden(_) => "CONV-403",
            Self::NotFound(_) => "CONV-404",
            Self::Validation(_) => "REQ-422",
            Self::Provider(_) => "PROVIDER-502",
            Self::Checkpoint(_) => "CKPT-500",
            Self::Store(_) => "STORE-500",
            Self::Session(SessionError::Unavailable(_)) => "AUTH-503",
            Self::Session(_) => "AUTH-401",
            Self::BackPressure(_) => "STREAM-503",
            Self::Internal(_) => "SYS-500",
        }
    }
}

impl From<SessionError> for OrchestratorError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Unauthorized => Self::Unauthorized,
            other => Self::Session(other),
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Forbidden(what) => Self::Forbidden(what),
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Store(other),
        }
    }
}
