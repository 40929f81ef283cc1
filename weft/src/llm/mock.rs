//! Scripted chat model for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::llm::{ChatModel, LlmReply, ProviderError};
use crate::message::{ChatMessage, MessageContent, ToolCall};
use crate::tools::ToolSpec;

#[derive(Default)]
struct Inner {
    /// Replies consumed in order; when empty, `fallback` repeats.
    script: Mutex<VecDeque<Result<LlmReply, String>>>,
    fallback: Mutex<Option<LlmReply>>,
    invocations: Mutex<Vec<Vec<ChatMessage>>>,
    bound_tools: Mutex<Vec<ToolSpec>>,
}

/// Deterministic [`ChatModel`]: scripted replies, recorded invocations,
/// streaming split into small chunks.
#[derive(Clone, Default)]
pub struct MockChat {
    inner: Arc<Inner>,
    /// Streaming chunk width in characters.
    chunk_chars: usize,
}

impl MockChat {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            chunk_chars: 2,
        }
    }

    /// Repeats `text` for every unscripted invocation.
    pub fn always(text: impl Into<String>) -> Self {
        let mock = Self::new();
        *mock.inner.fallback.lock().expect("mock lock") = Some(LlmReply {
            content: MessageContent::Text(text.into()),
            ..Default::default()
        });
        mock
    }

    pub fn enqueue_text(&self, text: impl Into<String>) -> &Self {
        self.enqueue(LlmReply {
            content: MessageContent::Text(text.into()),
            ..Default::default()
        })
    }

    pub fn enqueue_tool_call(&self, name: &str, arguments: serde_json::Value) -> &Self {
        self.enqueue(LlmReply {
            content: MessageContent::Text(String::new()),
            tool_calls: vec![ToolCall {
                id: format!("call_{name}"),
                name: name.into(),
                arguments,
            }],
            ..Default::default()
        })
    }

    pub fn enqueue(&self, reply: LlmReply) -> &Self {
        self.inner
            .script
            .lock()
            .expect("mock lock")
            .push_back(Ok(reply));
        self
    }

    pub fn enqueue_error(&self, message: impl Into<String>) -> &Self {
        self.inner
            .script
            .lock()
            .expect("mock lock")
            .push_back(Err(message.into()));
        self
    }

    /// Message lists of every invocation so far.
    pub fn invocations(&self) -> Vec<Vec<ChatMessage>> {
        self.inner.invocations.lock().expect("mock lock").clone()
    }

    pub fn bound_tools(&self) -> Vec<ToolSpec> {
        self.inner.bound_tools.lock().expect("mock lock").clone()
    }

    fn next_reply(&self, messages: &[ChatMessage]) -> Result<LlmReply, ProviderError> {
        self.inner
            .invocations
            .lock()
            .expect("mock lock")
            .push(messages.to_vec());
        if let Some(scripted) = self.inner.script.lock().expect("mock lock").pop_front() {
            return scripted.map_err(ProviderError::Request);
        }
        if let Some(fallback) = self.inner.fallback.lock().expect("mock lock").clone() {
            return Ok(fallback);
        }
        Err(ProviderError::Request("mock script exhausted".into()))
    }
}

#[async_trait]
impl ChatModel for MockChat {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<LlmReply, ProviderError> {
        self.next_reply(messages)
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<LlmReply, ProviderError> {
        let reply = self.next_reply(messages)?;
        if let Some(tx) = chunk_tx {
            let text = crate::message::extract_text(&reply.content);
            let chars: Vec<char> = text.chars().collect();
            for piece in chars.chunks(self.chunk_chars.max(1)) {
                let _ = tx.send(piece.iter().collect()).await;
            }
        }
        Ok(reply)
    }

    fn bind_tools(&self, tools: Vec<ToolSpec>) -> Arc<dyn ChatModel> {
        *self.inner.bound_tools.lock().expect("mock lock") = tools;
        Arc::new(self.clone())
    }
}
