//! Errors reported while compiling a [`StateGraph`](super::StateGraph).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompilationError {
    #[error("edge references unknown node: {0}")]
    NodeNotFound(String),
    #[error("no edge from START")]
    MissingStart,
    #[error("no path reaches END")]
    MissingEnd,
    #[error("node has both an edge and conditional edges: {0}")]
    NodeHasBothEdgeAndConditional(String),
    #[error("conditional path map targets unknown node: {0}")]
    InvalidConditionalPathMap(String),
    #[error("invalid chain: {0}")]
    InvalidChain(String),
}
