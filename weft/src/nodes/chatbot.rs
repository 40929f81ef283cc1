//! Core chat node: one model turn, streamed token by token.
//!
//! Injects the retrieved context as the single `sys_context` system
//! message (right after the instruction message, idempotently), trims
//! history to the configured bounds for the model call, and appends the
//! assistant reply. A reply carrying tool calls is emitted verbatim; the
//! conditional edge then loops through the tools node.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::OrchestratorError;
use crate::graph::{ExecContext, Node};
use crate::llm::ChatModel;
use crate::message::{approx_tokens, ChatMessage, Role};
use crate::nodes::CHATBOT;
use crate::state::{ChatPatch, ChatState, SYS_CONTEXT_ID, SYS_INSTRUCTION_ID};

pub struct ChatbotNode {
    model: Arc<dyn ChatModel>,
    max_history_messages: usize,
    max_history_tokens: usize,
}

impl ChatbotNode {
    pub fn new(
        model: Arc<dyn ChatModel>,
        max_history_messages: usize,
        max_history_tokens: usize,
    ) -> Self {
        Self {
            model,
            max_history_messages,
            max_history_tokens,
        }
    }

    fn combined_context(state: &ChatState) -> String {
        [state.kb_context.as_str(), state.history_context.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// The message list sent to the model: context injected after the
    /// instruction message, history tail trimmed to the configured
    /// bounds. State itself is trimmed nowhere; the bound applies to the
    /// invocation only.
    fn compose_request(&self, state: &ChatState) -> Vec<ChatMessage> {
        let mut messages = state.messages.clone();
        let context = Self::combined_context(state);
        if !context.is_empty() {
            if let Some(existing) = messages
                .iter_mut()
                .find(|m| m.id.as_deref() == Some(SYS_CONTEXT_ID))
            {
                existing.content = context.clone().into();
            } else {
                let at = messages
                    .iter()
                    .position(|m| m.id.as_deref() == Some(SYS_INSTRUCTION_ID))
                    .map(|i| i + 1)
                    .unwrap_or(0);
                messages.insert(at, ChatMessage::system(context).with_id(SYS_CONTEXT_ID));
            }
        }

        let head_len = messages
            .iter()
            .take_while(|m| m.role == Role::System)
            .count();
        let tail = &messages[head_len..];
        let mut kept = 0usize;
        let mut budget = self.max_history_tokens as i64;
        for m in tail.iter().rev() {
            if kept >= self.max_history_messages {
                break;
            }
            budget -= approx_tokens(&m.text()) as i64;
            if kept > 0 && budget < 0 {
                break;
            }
            kept += 1;
        }
        let mut request: Vec<ChatMessage> = messages[..head_len].to_vec();
        request.extend_from_slice(&tail[tail.len() - kept..]);
        request
    }
}

#[async_trait]
impl Node<ChatState> for ChatbotNode {
    fn id(&self) -> &str {
        CHATBOT
    }

    async fn run(
        &self,
        state: &ChatState,
        ctx: &ExecContext,
    ) -> Result<ChatPatch, OrchestratorError> {
        let request = self.compose_request(state);
        info!("chatbot receiving {} messages", request.len());

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(128);
        let forward = async {
            while let Some(chunk) = chunk_rx.recv().await {
                ctx.events.chat_delta(CHATBOT, chunk).await?;
            }
            Ok::<(), OrchestratorError>(())
        };
        let (reply, forwarded) = tokio::join!(
            self.model.stream(&request, Some(chunk_tx)),
            forward,
        );
        let reply = reply?;
        forwarded?;

        info!(
            has_tool_calls = !reply.tool_calls.is_empty(),
            content_len = crate::message::extract_text(&reply.content).chars().count(),
            "chatbot response"
        );

        let assistant = ChatMessage {
            id: None,
            role: Role::Assistant,
            content: reply.content,
            tool_calls: reply.tool_calls,
            tool_call_id: None,
            name: None,
        };
        Ok(ChatPatch {
            messages: vec![assistant],
            sys_context: Some(Self::combined_context(state)),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockChat;
    use crate::state::GraphState as _;
    use crate::stream::{EventSender, ExecEvent};

    fn base_state() -> ChatState {
        let mut state = ChatState::default();
        state.apply(ChatPatch {
            messages: vec![
                ChatMessage::system("你是助手").with_id(SYS_INSTRUCTION_ID),
                ChatMessage::user("你好"),
            ],
            ..Default::default()
        });
        state
    }

    /// **Scenario**: retrieved context reaches the model as one system
    /// message right after the instruction, and the state patch records it
    /// idempotently.
    #[tokio::test]
    async fn injects_sys_context_for_model() {
        let mock = MockChat::new();
        mock.enqueue_text("你好！");
        let node = ChatbotNode::new(Arc::new(mock.clone()), 20, 4000);
        let mut state = base_state();
        state.apply(ChatPatch {
            kb_context: Some("【知识库参考资料】\n1. [a.md] …".into()),
            history_context: Some("【相关历史对话】\n1. 用户: …".into()),
            ..Default::default()
        });

        let (events, _rx) = EventSender::channel(64);
        let ctx = ExecContext { thread_id: 1, events };
        let patch = node.run(&state, &ctx).await.unwrap();

        let seen = &mock.invocations()[0];
        assert_eq!(seen[0].id.as_deref(), Some(SYS_INSTRUCTION_ID));
        assert_eq!(seen[1].id.as_deref(), Some(SYS_CONTEXT_ID));
        assert!(seen[1].text().starts_with("【知识库参考资料】"));
        assert!(seen[1].text().contains("【相关历史对话】"));

        state.apply(patch);
        let count = state
            .messages
            .iter()
            .filter(|m| m.id.as_deref() == Some(SYS_CONTEXT_ID))
            .count();
        assert_eq!(count, 1);
    }

    /// **Scenario**: streamed deltas reach the event channel under the
    /// chatbot node id and concatenate to the persisted reply.
    #[tokio::test]
    async fn streams_deltas_to_events() {
        let mock = MockChat::new();
        mock.enqueue_text("今天天气不错");
        let node = ChatbotNode::new(Arc::new(mock), 20, 4000);
        let state = base_state();
        let (events, mut rx) = EventSender::channel(64);
        let ctx = ExecContext { thread_id: 1, events };
        let patch = node.run(&state, &ctx).await.unwrap();

        let mut streamed = String::new();
        while let Ok(ev) = rx.try_recv() {
            if let ExecEvent::ChatModelStream { node, delta } = ev {
                assert_eq!(node, CHATBOT);
                streamed.push_str(&delta);
            }
        }
        assert_eq!(streamed, "今天天气不错");
        assert_eq!(patch.messages[0].text(), streamed);
    }

    /// **Scenario**: a reply carrying tool calls is appended verbatim so
    /// the conditional edge can loop into tools.
    #[tokio::test]
    async fn tool_calls_pass_through() {
        let mock = MockChat::new();
        mock.enqueue_tool_call("get_current_time", serde_json::json!({}));
        let node = ChatbotNode::new(Arc::new(mock), 20, 4000);
        let (events, _rx) = EventSender::channel(64);
        let ctx = ExecContext { thread_id: 1, events };
        let patch = node.run(&base_state(), &ctx).await.unwrap();
        assert_eq!(patch.messages[0].tool_calls.len(), 1);
        assert_eq!(patch.messages[0].tool_calls[0].name, "get_current_time");
    }

    /// **Scenario**: the history bound trims the model's view (system
    /// block kept, non-system tail bounded) without touching state.
    #[tokio::test]
    async fn trims_model_view_only() {
        let mock = MockChat::new();
        mock.enqueue_text("ok");
        let node = ChatbotNode::new(Arc::new(mock.clone()), 2, 4000);
        let mut state = base_state();
        state.apply(ChatPatch {
            messages: vec![
                ChatMessage::assistant("旧回答"),
                ChatMessage::user("新问题"),
            ],
            ..Default::default()
        });

        let (events, _rx) = EventSender::channel(64);
        let ctx = ExecContext { thread_id: 1, events };
        node.run(&state, &ctx).await.unwrap();

        let seen = &mock.invocations()[0];
        assert_eq!(seen.len(), 3, "instruction + last two non-system");
        assert_eq!(seen[0].role, Role::System);
        assert_eq!(seen[1].text(), "旧回答");
        assert_eq!(seen[2].text(), "新问题");
        assert_eq!(state.messages.len(), 4, "state itself is untrimmed");
    }

    /// **Scenario**: provider errors bubble up and terminate the node.
    #[tokio::test]
    async fn provider_error_bubbles() {
        let mock = MockChat::new();
        mock.enqueue_error("upstream 500");
        let node = ChatbotNode::new(Arc::new(mock), 20, 4000);
        let (events, _rx) = EventSender::channel(64);
        let ctx = ExecContext { thread_id: 1, events };
        let err = node.run(&base_state(), &ctx).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Provider(_)));
    }
}
