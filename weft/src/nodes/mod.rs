//! The node catalogue: two sub-graphs selected by `mode` at the router.
//!
//! Chat: `router → rewrite → context_retrieval → chatbot ↔ tools`.
//! DeepSearch: `router → kb_precheck → planning ↔ search → summary`.
//!
//! Nodes hold their capability handles (model, retriever, registry,
//! search client) at construction; run-scoped identity arrives through
//! the [`ExecContext`](crate::graph::ExecContext).

mod chatbot;
mod context;
mod kb_precheck;
mod planning;
mod rewrite;
mod router;
mod search;
mod summary;
mod tools_node;

pub use chatbot::ChatbotNode;
pub use context::ContextRetrievalNode;
pub use kb_precheck::KbPrecheckNode;
pub use planning::{parse_search_queries, PlanningNode};
pub use rewrite::RewriteNode;
pub use router::{route_mode, RouterNode};
pub use search::SearchNode;
pub use summary::SummaryNode;
pub use tools_node::ToolsNode;

pub const ROUTER: &str = "router";
pub const REWRITE: &str = "rewrite";
pub const CONTEXT_RETRIEVAL: &str = "context_retrieval";
pub const CHATBOT: &str = "chatbot";
pub const TOOLS: &str = "tools";
pub const KB_PRECHECK: &str = "kb_precheck";
pub const PLANNING: &str = "planning";
pub const SEARCH: &str = "search";
pub const SUMMARY: &str = "summary";

use std::sync::Arc;

use crate::graph::END;
use crate::state::ChatState;

/// Router for the chatbot's conditional edge: loop into `tools` while the
/// reply carries tool calls, else end the sub-graph.
pub fn chatbot_route(state: &ChatState) -> String {
    let wants_tools = state
        .messages
        .last()
        .map(|m| !m.tool_calls.is_empty())
        .unwrap_or(false);
    if wants_tools {
        TOOLS.to_string()
    } else {
        END.to_string()
    }
}

/// Router for planning's conditional edge: search while queries are
/// pending and the round budget allows; at `max_rounds` the summary is
/// forced regardless.
pub fn planning_route(
    max_rounds: u32,
) -> Arc<dyn Fn(&ChatState) -> String + Send + Sync> {
    Arc::new(move |state: &ChatState| {
        if !state.search_queries.is_empty() && state.planning_rounds < max_rounds {
            SEARCH.to_string()
        } else {
            SUMMARY.to_string()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ChatMessage, ToolCall};
    use crate::state::{ChatPatch, GraphState as _};

    /// **Scenario**: chatbot routes to tools exactly when the last message
    /// carries tool calls.
    #[test]
    fn chatbot_route_by_tool_calls() {
        let mut state = ChatState::default();
        assert_eq!(chatbot_route(&state), END);
        state.apply(ChatPatch {
            messages: vec![ChatMessage::assistant("").with_tool_calls(vec![ToolCall {
                id: "c".into(),
                name: "get_current_time".into(),
                arguments: serde_json::json!({}),
            }])],
            ..Default::default()
        });
        assert_eq!(chatbot_route(&state), TOOLS);
        state.apply(ChatPatch {
            messages: vec![ChatMessage::assistant("done")],
            ..Default::default()
        });
        assert_eq!(chatbot_route(&state), END);
    }

    /// **Scenario**: planning keeps searching below the round cap and is
    /// forced into summary at the cap even with pending queries.
    #[test]
    fn planning_route_respects_cap() {
        let route = planning_route(2);
        let mut state = ChatState::default();
        state.apply(ChatPatch {
            search_queries: Some(vec!["rust 发布".into()]),
            planning_rounds: Some(1),
            ..Default::default()
        });
        assert_eq!(route(&state), SEARCH);
        state.apply(ChatPatch {
            planning_rounds: Some(2),
            ..Default::default()
        });
        assert_eq!(route(&state), SUMMARY, "cap forces summary");
        state.apply(ChatPatch {
            search_queries: Some(vec![]),
            planning_rounds: Some(0),
            ..Default::default()
        });
        assert_eq!(route(&state), SUMMARY, "no queries means summary");
    }
}
