//! Responses-style relay provider.
//!
//! The upstream only speaks a streaming "responses" API through a
//! synchronous SDK-style HTTP call, so it is bridged: a producer thread
//! runs the blocking request and feeds SSE deltas into a bounded
//! crossbeam queue (capacity 16), and the async side pulls from the queue
//! via `spawn_blocking`. This is the only place blocking I/O crosses into
//! the async world.
//!
//! Supported parameters: `temperature`, `max_tokens`, `timeout`; the rest
//! are dropped. No native tool use — `bind_tools` is identity.

use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::warn;

use env_config::ProviderSettings;

use crate::llm::{role_text_pairs, ChatModel, LlmReply, ProviderError};
use crate::message::{ChatMessage, MessageContent};
use crate::tools::ToolSpec;

/// Bounded queue between the producer thread and the async consumer.
const BRIDGE_QUEUE_CAPACITY: usize = 16;

/// One parsed SSE event from the responses wire.
#[derive(Debug, PartialEq)]
enum BridgeEvent {
    Delta(String),
    Failed(String),
    Ignored,
}

fn parse_event(line: &str) -> BridgeEvent {
    let Some(data) = line.trim_end().strip_prefix("data:") else {
        return BridgeEvent::Ignored;
    };
    let data = data.trim();
    if data.is_empty() || data == "[DONE]" {
        return BridgeEvent::Ignored;
    }
    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return BridgeEvent::Ignored;
    };
    match value.get("type").and_then(Value::as_str) {
        Some("response.output_text.delta") => BridgeEvent::Delta(
            value
                .get("delta")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        Some("response.failed") | Some("error") => BridgeEvent::Failed(
            value
                .get("message")
                .or_else(|| value.pointer("/error/message"))
                .and_then(Value::as_str)
                .unwrap_or("responses stream failed")
                .to_string(),
        ),
        _ => BridgeEvent::Ignored,
    }
}

fn input_items(messages: &[ChatMessage]) -> Vec<Value> {
    role_text_pairs(messages)
        .into_iter()
        .map(|(role, text)| json!({ "role": role, "content": text }))
        .collect()
}

/// Streaming-only relay bridged through a producer thread.
#[derive(Clone)]
pub struct ResponsesBridge {
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
}

impl ResponsesBridge {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            api_key: settings.api_key.clone().unwrap_or_default(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            model: settings.model_code.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout: Duration::from_secs(settings.timeout_secs),
        }
    }

    fn payload(&self, messages: &[ChatMessage]) -> Value {
        let mut payload = json!({
            "model": self.model,
            "input": input_items(messages),
            // The upstream rejects non-streaming requests.
            "stream": true,
        });
        if let Some(t) = self.temperature {
            payload["temperature"] = json!(t);
        }
        if let Some(m) = self.max_tokens {
            payload["max_output_tokens"] = json!(m);
        }
        payload
    }

    /// Runs the blocking request on the current (producer) thread,
    /// pushing events into `tx`. A full queue blocks the producer, which
    /// is the intended back-pressure.
    fn produce(
        url: String,
        api_key: String,
        payload: Value,
        timeout: Duration,
        tx: crossbeam_channel::Sender<Result<String, String>>,
    ) {
        let client = match reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(Err(format!("http client: {e}")));
                return;
            }
        };
        let response = match client
            .post(&url)
            .bearer_auth(&api_key)
            .json(&payload)
            .send()
        {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(Err(format!("request: {e}")));
                return;
            }
        };
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            let _ = tx.send(Err(format!("responses returned {status}: {body}")));
            return;
        }
        let reader = BufReader::new(response);
        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    let _ = tx.send(Err(format!("read: {e}")));
                    return;
                }
            };
            match parse_event(&line) {
                BridgeEvent::Delta(delta) => {
                    if tx.send(Ok(delta)).is_err() {
                        return; // consumer gone
                    }
                }
                BridgeEvent::Failed(message) => {
                    let _ = tx.send(Err(message));
                    return;
                }
                BridgeEvent::Ignored => {}
            }
        }
    }
}

#[async_trait]
impl ChatModel for ResponsesBridge {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<LlmReply, ProviderError> {
        self.stream(messages, None).await
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<LlmReply, ProviderError> {
        if self.base_url.is_empty() {
            return Err(ProviderError::Request(
                "responses provider has no base URL configured".into(),
            ));
        }
        let (tx, rx) = crossbeam_channel::bounded(BRIDGE_QUEUE_CAPACITY);
        let url = format!("{}/responses", self.base_url);
        let api_key = self.api_key.clone();
        let payload = self.payload(messages);
        let timeout = self.timeout;
        std::thread::spawn(move || Self::produce(url, api_key, payload, timeout, tx));

        let mut content = String::new();
        loop {
            let rx = rx.clone();
            let received = tokio::task::spawn_blocking(move || rx.recv_timeout(timeout))
                .await
                .map_err(|e| ProviderError::Request(format!("bridge task: {e}")))?;
            match received {
                Ok(Ok(delta)) => {
                    content.push_str(&delta);
                    if let Some(tx) = &chunk_tx {
                        if tx.send(delta).await.is_err() {
                            warn!("responses bridge: chunk receiver closed");
                        }
                    }
                }
                Ok(Err(message)) => return Err(ProviderError::Request(message)),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    return Err(ProviderError::Timeout(timeout.as_secs()))
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }

        Ok(LlmReply {
            content: MessageContent::Text(content),
            tool_calls: Vec::new(),
            usage: None,
        })
    }

    /// No native tool use upstream; identity per the adapter contract.
    fn bind_tools(&self, _tools: Vec<ToolSpec>) -> Arc<dyn ChatModel> {
        Arc::new(self.clone())
    }
}
