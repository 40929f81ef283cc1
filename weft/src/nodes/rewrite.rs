//! Pronoun-resolution node.
//!
//! Before retrieval, an ambiguous user message ("它多少钱？") is rewritten
//! against recent history into a self-contained query. Skipped unless the
//! message contains a pronoun and at least one prior message exists; a
//! model failure keeps the original message.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::OrchestratorError;
use crate::graph::{ExecContext, Node};
use crate::llm::ChatModel;
use crate::message::{ChatMessage, Role};
use crate::nodes::REWRITE;
use crate::state::{ChatPatch, ChatState};

const PRONOUNS: [&str; 9] = ["它", "这个", "那个", "他", "她", "他们", "她们", "这", "那"];

const REWRITE_PROMPT: &str = "你是一个查询重写专家。你的任务是将用户的查询进行代词消解，使其更加明确。

规则：
1. 如果用户消息中包含代词（如\"它\"、\"这个\"、\"那个\"、\"他\"、\"她\"等），根据对话历史将其替换为具体的实体名称
2. 如果用户消息已经足够清晰，直接返回原始消息
3. 只返回重写后的查询，不要添加任何解释
4. 保持用户的原始意图不变

示例：
对话历史: \"用户: iPhone 15 怎么样？助手: iPhone 15 是一款很棒的手机...\"
用户消息: \"它多少钱？\"
重写结果: \"iPhone 15 多少钱？\"
";

pub struct RewriteNode {
    model: Arc<dyn ChatModel>,
}

impl RewriteNode {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Last five messages before the query, assistant content truncated.
    fn history_block(state: &ChatState) -> String {
        let prior = &state.messages[..state.messages.len() - 1];
        let recent = prior.iter().rev().take(5).rev();
        let lines: Vec<String> = recent
            .map(|m| match m.role {
                Role::User => format!("用户: {}", m.text()),
                _ => {
                    let text: String = m.text().chars().take(200).collect();
                    format!("助手: {text}")
                }
            })
            .collect();
        if lines.is_empty() {
            "无历史".to_string()
        } else {
            lines.join("\n")
        }
    }
}

#[async_trait]
impl Node<ChatState> for RewriteNode {
    fn id(&self) -> &str {
        REWRITE
    }

    async fn run(
        &self,
        state: &ChatState,
        _ctx: &ExecContext,
    ) -> Result<ChatPatch, OrchestratorError> {
        let Some(last) = state.messages.last() else {
            return Ok(ChatPatch::default());
        };
        if last.role != Role::User {
            return Ok(ChatPatch::default());
        }
        let original = last.text();
        let has_pronoun = PRONOUNS.iter().any(|p| original.contains(p));
        if !has_pronoun || state.messages.len() <= 1 {
            debug!("skipping rewrite for: {original}");
            return Ok(ChatPatch::default());
        }

        let request = vec![
            ChatMessage::system(REWRITE_PROMPT),
            ChatMessage::user(format!(
                "对话历史:\n{}\n\n用户消息: {original}\n\n重写结果:",
                Self::history_block(state)
            )),
        ];
        match self.model.invoke(&request).await {
            Ok(reply) => {
                let rewritten = crate::message::extract_text(&reply.content)
                    .trim()
                    .to_string();
                if !rewritten.is_empty() && rewritten != original {
                    info!("query rewritten: '{original}' -> '{rewritten}'");
                    return Ok(ChatPatch {
                        rewritten_question: Some(rewritten),
                        ..Default::default()
                    });
                }
                Ok(ChatPatch::default())
            }
            Err(e) => {
                warn!("query rewrite failed: {e}, using original query");
                Ok(ChatPatch::default())
            }
        }
    }
}
