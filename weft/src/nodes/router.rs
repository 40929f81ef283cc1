//! Entry router: identity passthrough; the conditional edge picks the
//! sub-graph from `state.mode`.

use async_trait::async_trait;

use crate::error::OrchestratorError;
use crate::graph::{ExecContext, Node};
use crate::nodes::{KB_PRECHECK, REWRITE, ROUTER};
use crate::state::{ChatPatch, ChatState, Mode};

pub struct RouterNode;

/// Conditional edge off the router.
pub fn route_mode(state: &ChatState) -> String {
    match state.mode {
        Mode::Chat => REWRITE.to_string(),
        Mode::DeepSearch => KB_PRECHECK.to_string(),
    }
}

#[async_trait]
impl Node<ChatState> for RouterNode {
    fn id(&self) -> &str {
        ROUTER
    }

    async fn run(
        &self,
        _state: &ChatState,
        _ctx: &ExecContext,
    ) -> Result<ChatPatch, OrchestratorError> {
        Ok(ChatPatch::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GraphState as _;

    /// **Scenario**: the mode tag selects the sub-graph.
    #[test]
    fn routes_by_mode() {
        let mut state = ChatState::default();
        assert_eq!(route_mode(&state), REWRITE);
        state.apply(ChatPatch {
            mode: Some(Mode::DeepSearch),
            ..Default::default()
        });
        assert_eq!(route_mode(&state), KB_PRECHECK);
    }
}
