//! OpenAI-compatible chat completions provider.
//!
//! Talks to any `/chat/completions` endpoint (DeepSeek by default; custom
//! base URLs for relays). Supports `temperature`, `top_p`, `max_tokens`,
//! and the per-invocation timeout; `top_k` is not part of this wire
//! contract and is dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use env_config::ProviderSettings;

use crate::llm::{parse_arguments, ChatModel, LlmReply, LlmUsage, ProviderError, ToolCallAccumulator};
use crate::message::{ChatMessage, MessageContent, Role};
use crate::tools::ToolSpec;

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: WireFunctionCall,
}

#[derive(Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Deserialize)]
struct WireResponseMessage {
    /// String or typed parts, depending on the upstream.
    #[serde(default)]
    content: Option<MessageContent>,
    #[serde(default)]
    tool_calls: Option<Vec<WireResponseToolCall>>,
}

#[derive(Deserialize)]
struct WireResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireResponseFunction,
}

#[derive(Deserialize)]
struct WireResponseFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChunkChoice {
    delta: WireDelta,
}

#[derive(Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireDeltaToolCall>>,
}

#[derive(Deserialize)]
struct WireDeltaToolCall {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireDeltaFunction>,
}

#[derive(Deserialize)]
struct WireDeltaFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl From<&WireUsage> for LlmUsage {
    fn from(u: &WireUsage) -> Self {
        LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// Chat completions over any OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiCompatible {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_tokens: Option<u32>,
    timeout: Duration,
    tools: Vec<ToolSpec>,
}

impl OpenAiCompatible {
    pub fn new(settings: &ProviderSettings) -> Self {
        if settings.top_k.is_some() {
            debug!(model = %settings.model_code, "top_k unsupported by chat completions; dropped");
        }
        Self {
            http: reqwest::Client::new(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.deepseek.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            model: settings.model_code.clone(),
            temperature: settings.temperature,
            top_p: settings.top_p,
            max_tokens: settings.max_tokens,
            timeout: Duration::from_secs(settings.timeout_secs),
            tools: Vec::new(),
        }
    }

    fn to_wire(messages: &[ChatMessage]) -> Vec<WireMessage> {
        messages
            .iter()
            .map(|m| {
                let text = m.text();
                WireMessage {
                    role: m.role.as_str(),
                    content: if text.is_empty() && m.role == Role::Assistant {
                        None
                    } else {
                        Some(text)
                    },
                    tool_calls: if m.tool_calls.is_empty() {
                        None
                    } else {
                        Some(
                            m.tool_calls
                                .iter()
                                .map(|tc| WireToolCall {
                                    id: tc.id.clone(),
                                    call_type: "function",
                                    function: WireFunctionCall {
                                        name: tc.name.clone(),
                                        arguments: tc.arguments.to_string(),
                                    },
                                })
                                .collect(),
                        )
                    },
                    tool_call_id: m.tool_call_id.clone(),
                    name: m.name.clone(),
                }
            })
            .collect()
    }

    fn request(&self, messages: &[ChatMessage], stream: bool) -> WireRequest {
        WireRequest {
            model: self.model.clone(),
            messages: Self::to_wire(messages),
            tools: if self.tools.is_empty() {
                None
            } else {
                Some(
                    self.tools
                        .iter()
                        .map(|t| WireTool {
                            tool_type: "function",
                            function: WireFunction {
                                name: t.name.clone(),
                                description: t.description.clone(),
                                parameters: t.parameters.clone(),
                            },
                        })
                        .collect(),
                )
            },
            tool_choice: if self.tools.is_empty() {
                None
            } else {
                Some(Value::String("auto".into()))
            },
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
            stream: stream.then_some(true),
        }
    }

    async fn post(&self, request: &WireRequest) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let fut = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send();
        let response = tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Request(format!(
                "chat completions returned {status}: {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatible {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<LlmReply, ProviderError> {
        let response = self.post(&self.request(messages, false)).await?;
        let body: WireResponse = tokio::time::timeout(self.timeout, response.json())
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Decode("no choices in response".into()))?;
        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| crate::message::ToolCall {
                id: tc
                    .id
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                name: tc.function.name,
                arguments: parse_arguments(&tc.function.arguments),
            })
            .collect();
        Ok(LlmReply {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            usage: body.usage.as_ref().map(LlmUsage::from),
        })
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        chunk_tx: Option<mpsc::Sender<String>>,
    ) -> Result<LlmReply, ProviderError> {
        let response = self.post(&self.request(messages, true)).await?;
        let mut bytes = response.bytes_stream();
        let mut buffer = String::new();
        let mut content = String::new();
        let mut accumulator = ToolCallAccumulator::default();
        let mut usage: Option<LlmUsage> = None;

        let consume = |line: &str,
                       content: &mut String,
                       accumulator: &mut ToolCallAccumulator,
                       usage: &mut Option<LlmUsage>|
         -> Option<String> {
            let data = line.strip_prefix("data:")?.trim();
            if data.is_empty() || data == "[DONE]" {
                return None;
            }
            let chunk: WireChunk = serde_json::from_str(data).ok()?;
            if let Some(u) = &chunk.usage {
                *usage = Some(LlmUsage::from(u));
            }
            let mut delta_text = String::new();
            for choice in chunk.choices {
                if let Some(text) = choice.delta.content {
                    content.push_str(&text);
                    delta_text.push_str(&text);
                }
                for tc in choice.delta.tool_calls.unwrap_or_default() {
                    accumulator.push(
                        tc.index,
                        tc.id.as_deref(),
                        tc.function.as_ref().and_then(|f| f.name.as_deref()),
                        tc.function.as_ref().and_then(|f| f.arguments.as_deref()),
                    );
                }
            }
            (!delta_text.is_empty()).then_some(delta_text)
        };

        loop {
            let next = tokio::time::timeout(self.timeout, bytes.next())
                .await
                .map_err(|_| ProviderError::Timeout(self.timeout.as_secs()))?;
            let Some(result) = next else { break };
            let part = result.map_err(|e| ProviderError::Request(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&part));
            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                if let Some(delta) =
                    consume(line.trim_end(), &mut content, &mut accumulator, &mut usage)
                {
                    if let Some(tx) = &chunk_tx {
                        let _ = tx.send(delta).await;
                    }
                }
            }
        }
        if let Some(delta) = consume(buffer.trim_end(), &mut content, &mut accumulator, &mut usage)
        {
            if let Some(tx) = &chunk_tx {
                let _ = tx.send(delta).await;
            }
        }

        Ok(LlmReply {
            content: MessageContent::Text(content),
            tool_calls: accumulator.finish(),
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
    use crate::message::ToolCall;

    /// **Scenario**: the wire projection keeps tool linkage fields and
    /// omits content on tool-call-only assistant turns.
    #[test]
    fn wire_projection() {
        let messages = vec![
            ChatMessage::system("inst"),
            ChatMessage::user("what time is it?"),
            ChatMessage::assistant("").with_tool_calls(vec![ToolCall {
                id: "call_1".into(),
                name: "get_current_time".into(),
                arguments: serde_json::json!({}),
            }]),
            ChatMessage::tool("12:00", "call_1", "get_current_time"),
        ];
        let wire = OpenAiCompatible::to_wire(&messages);
        assert_eq!(wire[0].role, "system");
        assert!(wire[2].content.is_none());
        assert_eq!(
            wire[2].tool_calls.as_ref().unwrap()[0].function.arguments,
            "{}"
        );
        assert_eq!(wire[3].role, "tool");
        assert_eq!(wire[3].tool_call_id.as_deref(), Some("call_1"));
    }

    /// **Scenario**: response content deserializes from both the string
    /// and the typed-parts shapes.
    #[test]
    fn response_content_both_shapes() {
        let body: WireResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"plain"}}]}"#,
        )
        .unwrap();
        assert_eq!(
            crate::message::extract_text(body.choices[0].message.content.as_ref().unwrap()),
            "plain"
        );
        let body: WireResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":[{"type":"text","text":"parts"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(
            crate::message::extract_text(body.choices[0].message.content.as_ref().unwrap()),
            "parts"
        );
    }

    /// **Scenario**: unsupported `top_k` is dropped at construction while
    /// supported parameters survive.
    #[test]
    fn parameter_mapping_drops_top_k() {
        let settings = ProviderSettings {
            model_code: "deepseek-chat".into(),
            temperature: Some(0.7),
            top_p: Some(0.9),
            top_k: Some(40),
            max_tokens: Some(1024),
            timeout_secs: 30,
            ..Default::default()
        };
        let provider = OpenAiCompatible::new(&settings);
        let request = provider.request(&[ChatMessage::user("hi")], false);
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.top_p, Some(0.9));
        assert_eq!(request.max_tokens, Some(1024));
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("top_k").is_none());
    }
}
