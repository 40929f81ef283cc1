//! Tool execution node.
//!
//! Runs every call requested by the last assistant message concurrently,
//! emitting `tool_start` / `tool_end` around each execution, and appends
//! one tool-result message per call. Tool failures are captured as an
//! error payload in the result message — the model decides whether to
//! recover — and never terminate the invocation.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::graph::{ExecContext, Node};
use crate::message::{ChatMessage, Role, ToolCall};
use crate::nodes::TOOLS;
use crate::state::{ChatPatch, ChatState};
use crate::tools::ToolRegistry;

pub struct ToolsNode {
    registry: Arc<ToolRegistry>,
}

impl ToolsNode {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    async fn execute(&self, ctx: &ExecContext, call: &ToolCall) -> Result<ChatMessage, OrchestratorError> {
        ctx.events.tool_start(&call.name).await?;
        let output = match self.registry.get(&call.name) {
            Some(tool) => match tool.call(&call.arguments).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(tool = %call.name, "tool failed: {e}");
                    serde_json::json!({ "error": e.to_string() }).to_string()
                }
            },
            None => {
                warn!(tool = %call.name, "unknown tool requested");
                serde_json::json!({ "error": format!("unknown tool: {}", call.name) })
                    .to_string()
            }
        };
        ctx.events.tool_end(&call.name).await?;
        Ok(ChatMessage::tool(output, call.id.clone(), call.name.clone()))
    }
}

#[async_trait]
impl Node<ChatState> for ToolsNode {
    fn id(&self) -> &str {
        TOOLS
    }

    async fn run(
        &self,
        state: &ChatState,
        ctx: &ExecContext,
    ) -> Result<ChatPatch, OrchestratorError> {
        let calls: Vec<ToolCall> = state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.tool_calls.clone())
            .unwrap_or_default();
        if calls.is_empty() {
            return Ok(ChatPatch::default());
        }
        info!(count = calls.len(), "executing tool calls");

        let results = join_all(calls.iter().map(|call| self.execute(ctx, call))).await;
        let mut messages = Vec::with_capacity(results.len());
        for result in results {
            messages.push(result?);
        }
        Ok(ChatPatch {
            messages,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GraphState as _;
    use crate::stream::{EventSender, ExecEvent};

    fn state_with_calls(calls: Vec<ToolCall>) -> ChatState {
        let mut state = ChatState::default();
        state.apply(ChatPatch {
            messages: vec![
                ChatMessage::user("现在几点了？顺便算一下 1+2"),
                ChatMessage::assistant("").with_tool_calls(calls),
            ],
            ..Default::default()
        });
        state
    }

    /// **Scenario**: each requested call yields one tool-result message
    /// in call order, bracketed by start/end events.
    #[tokio::test]
    async fn executes_calls_concurrently() {
        let node = ToolsNode::new(Arc::new(ToolRegistry::builtin()));
        let state = state_with_calls(vec![
            ToolCall {
                id: "call_1".into(),
                name: "get_current_time".into(),
                arguments: serde_json::json!({}),
            },
            ToolCall {
                id: "call_2".into(),
                name: "simple_calculator".into(),
                arguments: serde_json::json!({ "expression": "1+2" }),
            },
        ]);
        let (events, mut rx) = EventSender::channel(64);
        let ctx = ExecContext { thread_id: 1, events };

        let patch = node.run(&state, &ctx).await.unwrap();
        assert_eq!(patch.messages.len(), 2);
        assert_eq!(patch.messages[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(patch.messages[1].text(), "3");
        assert!(patch.messages.iter().all(|m| m.role == Role::Tool));

        let mut starts = 0;
        let mut ends = 0;
        while let Ok(ev) = rx.try_recv() {
            match ev {
                ExecEvent::ToolStart { .. } => starts += 1,
                ExecEvent::ToolEnd { .. } => ends += 1,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!((starts, ends), (2, 2));
    }

    /// **Scenario**: a failing or unknown tool is wrapped as an error
    /// payload, not a node failure.
    #[tokio::test]
    async fn failures_become_error_payloads() {
        let node = ToolsNode::new(Arc::new(ToolRegistry::builtin()));
        let state = state_with_calls(vec![
            ToolCall {
                id: "call_1".into(),
                name: "simple_calculator".into(),
                arguments: serde_json::json!({ "expression": "1 / 0" }),
            },
            ToolCall {
                id: "call_2".into(),
                name: "no_such_tool".into(),
                arguments: serde_json::json!({}),
            },
        ]);
        let (events, _rx) = EventSender::channel(64);
        let ctx = ExecContext { thread_id: 1, events };

        let patch = node.run(&state, &ctx).await.unwrap();
        assert!(patch.messages[0].text().contains("error"));
        assert!(patch.messages[1].text().contains("unknown tool"));
    }

    /// **Scenario**: no pending tool calls is a no-op.
    #[tokio::test]
    async fn no_calls_is_noop() {
        let node = ToolsNode::new(Arc::new(ToolRegistry::builtin()));
        let mut state = ChatState::default();
        state.apply(ChatPatch {
            messages: vec![ChatMessage::assistant("plain reply")],
            ..Default::default()
        });
        let (events, _rx) = EventSender::channel(64);
        let ctx = ExecContext { thread_id: 1, events };
        let patch = node.run(&state, &ctx).await.unwrap();
        assert!(patch.messages.is_empty());
    }
}
