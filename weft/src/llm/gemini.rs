//! Google Gemini provider (REST `generateContent` / SSE
//! `streamGenerateContent`).
//!
//! Gemini supports the full parameter set (`temperature`, `top_p`,
//! `top_k`, `max_tokens`). System messages collapse into
//! `system_instruction`; tool results travel back as `functionResponse`
//! parts. Gemini does not assign tool-call ids, so they are generated on
//! receipt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use env_config::ProviderSettings;

use crate::llm::{ChatModel, LlmReply, LlmUsage, ProviderError};
use crate::message::{ChatMessage, MessageContent, Role, ToolCall};
use crate::tools::ToolSpec;

const DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com";

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Deserialize)]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "functionCall")]
    function_call: Option<WireFunctionCall>,
}

#[derive(Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default, rename = "promptTokenCount")]
    prompt_token_count: u32,
    #[serde(default, rename = "candidatesTokenCount")]
    candidates_token_count: u32,
    #[serde(default, rename = "totalTokenCount")]
    total_token_count: u32,
}

impl From<&WireUsage> for LlmUsage {
    fn from(u: &WireUsage) -> Self {
        LlmUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
}

/// Gemini chat client.
#[derive(Clone)]
pub struct Gemini {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    top_k: Option<u32>,
    max_tokens: Option<u32>,
    timeout: Duration,
    tools: Vec<ToolSpec>,
}

impl Gemini {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: settings.model_code.clone(),
            temperature: settings.temperature,
            top_p: settings.top_p,
            top_k: settings.top_k,
            max_tokens: settings.max_tokens,
            timeout: Duration::from_secs(settings.timeout_secs),
            tools: Vec::new(),
        }
    }

    fn body(&self, messages: &[ChatMessage]) -> Value {
        let mut system_texts: Vec<String> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();
        for m in messages {
            match m.role {
                Role::System => system_texts.push(m.text()),
                Role::User => contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": m.text() }],
                })),
                Role::Assistant => {
                    let mut parts: Vec<Value> = Vec::new();
                    let text = m.text();
                    if !text.is_empty() {
                        parts.push(json!({ "text": text }));
                    }
                    for tc in &m.tool_calls {
                        parts.push(json!({
                            "functionCall": { "name": tc.name, "args": tc.arguments },
                        }));
                    }
                    if !parts.is_empty() {
                        contents.push(json!({ "role": "model", "parts": parts }));
                    }
                }
                Role::Tool => contents.push(json!({
                    "role": "user",
                    "parts": [{
                        "functionResponse": {
                            "name": m.name.clone().unwrap_or_default(),
                            "response": { "result": m.text() },
                        },
                    }],
                })),
            }
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(v) = self.temperature {
            generation_config.insert("temperature".into(), json!(v));
        }
        if let Some(v) = self.top_p {
            generation_config.insert("topP".into(), json!(v));
        }
        if let Some(v) = self.top_k {
            generation_config.insert("topK".into(), json!(v));
        }
        if let Some(v) = self.max_tokens {
            generation_config.insert("maxOutputTokens".into(), json!(v));
        }

        let mut body = serde_json::Map::new();
        body.insert("contents".into(), Value::Array(contents));
        if !system_texts.is_empty() {
            body.insert(
                "system_instruction".into(),
                json!({ "parts": [{ "text": system_texts.join("\n\n") }] }),
            );
        }
        if !generation_config.is_empty() {
            body.insert("generationConfig".into(), Value::Object(generation_config));
        }
        if !self.tools.is_empty() {
            let declarations: Vec<Value> = self
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description.clone().unwrap_or_default(),
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body.insert(
                "tools".into(),
                json!([{ "functionDeclarations": declarations }]),
            );
        }
        Value::Object(body)
    }

    fn collect_parts(
        parts: Vec<WirePart>,
        content: &mut String,
        tool_calls: &mut Vec<ToolCall>,
    ) -> String {
        let mut delta = String::new();
        for part in parts {
            if let Some(text) = part.text {
                content.push_str(&text);
                delta.push_str(&text);
            }
            if let Some(fc) = part.function_call {
                tool_calls.push(ToolCall {
                    id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                    name: fc.name,
                    arguments: if fc.args.is_object() {
                        fc.args
                    } else {
                        json!({})
                    },
                });
            }
        }
        delta
    }
}

#[async_trait]
impl ChatModel for Gemini {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<LlmReply, ProviderError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let fut = self.http.post(&url).json(&self.body(messages)).send();
        let response = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Request(format!(
                "gemini returned {status}: {body}"
            )));
        }
        let body: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let usage = body.usage_metadata.as_ref().map(LlmUsage::from);
        for candidate in body.candidates.into_iter().take(1) {
            if let Some(c) = candidate.content {
                Self::collect_parts(c.parts, &mut content, &mut tool_calls);
            }
        }
        Ok(LlmReply {
            content: MessageContent::Text(content),
            tool_calls,
            usage,
        })
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<LlmReply, ProviderError> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.model, self.api_key
        );
        let fut = self.http.post(&url).json(&self.body(messages)).send();
        let response = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Request(format!(
                "gemini stream returned {status}: {body}"
            )));
        }

        let mut bytes = response.bytes_stream();
        let mut buffer = String::new();
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut usage: Option<LlmUsage> = None;

        loop {
            let next = tokio::time::timeout(self.timeout, bytes.next())
                .await
                .map_err(|_| ProviderError::Timeout(self.timeout.as_secs()))?;
            let Some(result) = next else { break };
            let part = result.map_err(|e| ProviderError::Request(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&part));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let Some(data) = line.trim_end().strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }
                let Ok(chunk) = serde_json::from_str::<WireResponse>(data) else {
                    continue;
                };
                if let Some(u) = &chunk.usage_metadata {
                    usage = Some(LlmUsage::from(u));
                }
                for candidate in chunk.candidates.into_iter().take(1) {
                    if let Some(c) = candidate.content {
                        let delta = Self::collect_parts(c.parts, &mut content, &mut tool_calls);
                        if !delta.is_empty() {
                            if let Some(tx) = &chunk_tx {
                                let _ = tx.send(delta).await;
                            }
                        }
                    }
                }
            }
        }

        Ok(LlmReply {
            content: MessageContent::Text(content),
            tool_calls,
            usage,
        })
    }

    fn bind_tools(&self, tools: Vec<ToolSpec>) -> Arc<dyn ChatModel> {
        let mut bound = self.clone();
        bound.tools = tools;
        Arc::new(bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> Gemini {
        Gemini::new(&ProviderSettings {
            model_code: "gemini-2.0-flash".into(),
            temperature: Some(0.5),
            top_k: Some(32),
            timeout_secs: 30,
            ..Default::default()
        })
    }

    /// **Scenario**: system messages collapse into system_instruction;
    /// assistant and tool turns map to model / functionResponse parts.
    #[test]
    fn body_projection() {
        let g = provider();
        let messages = vec![
            ChatMessage::system("inst"),
            ChatMessage::user("time?"),
            ChatMessage::assistant("").with_tool_calls(vec![ToolCall {
                id: "call_x".into(),
                name: "get_current_time".into(),
                arguments: json!({}),
            }]),
            ChatMessage::tool("12:00", "call_x", "get_current_time"),
        ];
        let body = g.body(&messages);
        assert_eq!(
            body["system_instruction"]["parts"][0]["text"],
            "inst"
        );
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(
            body["contents"][1]["parts"][0]["functionCall"]["name"],
            "get_current_time"
        );
        assert_eq!(
            body["contents"][2]["parts"][0]["functionResponse"]["response"]["result"],
            "12:00"
        );
        // top_k is supported here, mapped to camelCase.
        assert_eq!(body["generationConfig"]["topK"], 32);
    }

    /// **Scenario**: response parts aggregate into text plus normalised
    /// tool calls with generated ids.
    #[test]
    fn collect_parts_normalises() {
        let parts: Vec<WirePart> = serde_json::from_value(json!([
            { "text": "he" },
            { "text": "llo" },
            { "functionCall": { "name": "lookup", "args": { "q": "rust" } } },
        ]))
        .unwrap();
        let mut content = String::new();
        let mut calls = Vec::new();
        let delta = Gemini::collect_parts(parts, &mut content, &mut calls);
        assert_eq!(delta, "hello");
        assert_eq!(content, "hello");
        assert_eq!(calls[0].name, "lookup");
        assert_eq!(calls[0].arguments, json!({ "q": "rust" }));
        assert!(calls[0].id.starts_with("call_"));
    }
}
