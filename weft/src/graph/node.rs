//! Graph node contract: one async step from state to patch.

use async_trait::async_trait;

use crate::error::OrchestratorError;
use crate::state::GraphState;
use crate::stream::EventSender;

/// Run-scoped context handed to every node.
///
/// Carries the thread identity (= conversation id) and the event sender for
/// per-token deltas and tool lifecycle events. Capability handles (models,
/// retriever, tool registry) are held by the nodes themselves.
#[derive(Clone, Debug)]
pub struct ExecContext {
    pub thread_id: i64,
    pub events: EventSender,
}

/// One step in a graph: read the state, return a patch.
///
/// The executor merges the patch through the state's reducer
/// ([`GraphState::apply`]) and then resolves the outgoing edge. Nodes never
/// see or mutate the merged state directly.
#[async_trait]
pub trait Node<S: GraphState>: Send + Sync {
    /// Node id, unique within a graph (e.g. `"chatbot"`, `"planning"`).
    fn id(&self) -> &str;

    async fn run(&self, state: &S, ctx: &ExecContext) -> Result<S::Patch, OrchestratorError>;
}
