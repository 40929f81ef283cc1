//! Uniform chat surface over heterogeneous LLM providers.
//!
//! [`ChatModel`] exposes non-streaming `invoke`, token-streaming `stream`,
//! and `bind_tools`. Implementations: [`OpenAiCompatible`] (DeepSeek
//! default, any OpenAI-compatible base URL), [`Gemini`] (REST + SSE),
//! [`ResponsesBridge`] (streaming-only relay bridged from a producer
//! thread), and [`MockChat`] for tests.
//!
//! Each provider accepts a subset of `{temperature, top_p, top_k,
//! max_tokens, timeout}` and silently drops the rest; that is part of the
//! contract. Tool calls are normalised to `{name, arguments}` with
//! `arguments` always a JSON object.

mod gemini;
mod mock;
mod openai;
mod responses;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::{ChatMessage, MessageContent, ToolCall};
use crate::tools::ToolSpec;

pub use gemini::Gemini;
pub use mock::MockChat;
pub use openai::OpenAiCompatible;
pub use responses::ResponsesBridge;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request: {0}")]
    Request(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// Token usage reported by a provider, when available.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One completed model turn.
#[derive(Clone, Debug, Default)]
pub struct LlmReply {
    pub content: MessageContent,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

/// Uniform chat interface; see the module docs for the implementations.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Non-streaming completion: full content plus any tool calls.
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<LlmReply, ProviderError>;

    /// Streaming completion. When `chunk_tx` is set, content deltas are
    /// sent as they arrive; the full reply is still returned at the end.
    /// Streaming tool-call fragments are accumulated internally — callers
    /// only ever see the fully-formed `tool_calls` on the returned reply.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<LlmReply, ProviderError> {
        let reply = self.invoke(messages).await?;
        if let Some(tx) = chunk_tx {
            let text = crate::message::extract_text(&reply.content);
            if !text.is_empty() {
                let _ = tx.send(text).await;
            }
        }
        Ok(reply)
    }

    /// Returns a handle advertising the given tools; identity on providers
    /// without native tool use.
    fn bind_tools(&self, tools: Vec<ToolSpec>) -> Arc<dyn ChatModel>;
}

/// Parses accumulated tool-call arguments into a JSON object; malformed
/// payloads are preserved under `"raw"` instead of being dropped.
pub(crate) fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        _ => serde_json::json!({ "raw": raw }),
    }
}

/// Accumulates streamed tool-call fragments keyed by index; fragments may
/// arrive split across deltas in any field.
#[derive(Debug, Default)]
pub(crate) struct ToolCallAccumulator {
    entries: BTreeMap<u32, (String, String, String)>,
}

impl ToolCallAccumulator {
    pub(crate) fn push(
        &mut self,
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        let entry = self.entries.entry(index).or_default();
        if let Some(id) = id {
            if !id.is_empty() {
                entry.0 = id.to_string();
            }
        }
        if let Some(name) = name {
            entry.1.push_str(name);
        }
        if let Some(args) = arguments {
            entry.2.push_str(args);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fully-formed calls in index order; missing ids get a generated one.
    pub(crate) fn finish(self) -> Vec<ToolCall> {
        self.entries
            .into_values()
            .map(|(id, name, arguments)| ToolCall {
                id: if id.is_empty() {
                    format!("call_{}", uuid::Uuid::new_v4().simple())
                } else {
                    id
                },
                name,
                arguments: parse_arguments(&arguments),
            })
            .collect()
    }
}

/// Shared helper: a plain `role -> text` projection for providers that
/// accept the OpenAI message shape.
pub(crate) fn role_text_pairs(messages: &[ChatMessage]) -> Vec<(&'static str, String)> {
    messages
        .iter()
        .map(|m| (m.role.as_str(), m.text()))
        .collect()
}

/// Picks the chat provider from the configuration: DeepSeek-style chat
/// completions by default, Gemini when only its key is present, the
/// responses relay when only its base URL is configured.
pub fn provider_from_settings(settings: &env_config::Settings) -> Arc<dyn ChatModel> {
    if settings.deepseek.api_key.is_some() {
        return Arc::new(OpenAiCompatible::new(&settings.deepseek));
    }
    if settings.gemini.api_key.is_some() {
        return Arc::new(Gemini::new(&settings.gemini));
    }
    if settings.responses.base_url.is_some() {
        return Arc::new(ResponsesBridge::new(&settings.responses));
    }
    Arc::new(OpenAiCompatible::new(&settings.deepseek))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: fragments split across deltas re-assemble into one
    /// call per index, in index order, with parsed JSON arguments.
    #[test]
    fn accumulator_reassembles_split_fragments() {
        let mut acc = ToolCallAccumulator::default();
        acc.push(1, None, Some("simple_"), None);
        acc.push(0, Some("call_a"), Some("get_current_time"), Some("{"));
        acc.push(0, None, None, Some("}"));
        acc.push(1, Some("call_b"), Some("calculator"), Some(r#"{"expression":"#));
        acc.push(1, None, None, Some(r#""1+2"}"#));

        let calls = acc.finish();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].name, "get_current_time");
        assert_eq!(calls[0].arguments, serde_json::json!({}));
        assert_eq!(calls[1].name, "simple_calculator");
        assert_eq!(
            calls[1].arguments,
            serde_json::json!({"expression": "1+2"})
        );
    }

    /// **Scenario**: a missing id is generated; malformed argument JSON is
    /// preserved under "raw".
    #[test]
    fn accumulator_fills_gaps() {
        let mut acc = ToolCallAccumulator::default();
        acc.push(0, None, Some("t"), Some("not json"));
        let calls = acc.finish();
        assert!(calls[0].id.starts_with("call_"));
        assert_eq!(calls[0].arguments, serde_json::json!({"raw": "not json"}));
    }

    /// **Scenario**: empty and non-object argument payloads normalise to
    /// an object either way.
    #[test]
    fn parse_arguments_always_object() {
        assert_eq!(parse_arguments(""), serde_json::json!({}));
        assert_eq!(parse_arguments("  "), serde_json::json!({}));
        assert_eq!(parse_arguments("[1]"), serde_json::json!({"raw": "[1]"}));
        assert_eq!(
            parse_arguments(r#"{"a":1}"#),
            serde_json::json!({"a": 1})
        );
    }
}
