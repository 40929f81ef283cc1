//! Structured chat messages flowing through the graph state.
//!
//! Upstream providers return `content` either as a plain string or as a list
//! of typed parts; every read site routes through [`extract_text`] so the
//! rest of the system only ever sees plain text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message author role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// One typed content part (provider "parts" shape).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
}

/// Message content: a plain string or a list of typed parts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

/// Extracts plain text from either content shape.
pub fn extract_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(s) => s.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join(""),
    }
}

/// One tool invocation requested by the model, normalised across providers:
/// `arguments` is always a JSON object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One node of the in-flight message sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Stable in-state id; used for idempotent system-message injection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool-result messages: which call this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name on tool-result messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self {
            id: None,
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self {
            role: Role::User,
            ..Self::system(content)
        }
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self {
            role: Role::Assistant,
            ..Self::system(content)
        }
    }

    pub fn tool(content: impl Into<MessageContent>, call_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
            ..Self::system(content)
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    /// Plain text of this message via [`extract_text`].
    pub fn text(&self) -> String {
        extract_text(&self.content)
    }
}

/// Cheap token-count proxy: characters / 2 (history trim bound).
pub fn approx_tokens(text: &str) -> usize {
    text.chars().count() / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: extract_text handles string content, typed parts, and
    /// empty parts lists.
    #[test]
    fn extract_text_both_shapes() {
        assert_eq!(extract_text(&MessageContent::Text("hello".into())), "hello");
        let parts = MessageContent::Parts(vec![
            ContentPart::Text { text: "wor".into() },
            ContentPart::Text { text: "ld".into() },
        ]);
        assert_eq!(extract_text(&parts), "world");
        assert_eq!(extract_text(&MessageContent::Parts(vec![])), "");
    }

    /// **Scenario**: untagged content deserializes from both provider
    /// encodings.
    #[test]
    fn content_deserializes_from_string_and_parts() {
        let c: MessageContent = serde_json::from_str("\"hi\"").unwrap();
        assert_eq!(extract_text(&c), "hi");
        let c: MessageContent =
            serde_json::from_str(r#"[{"type":"text","text":"hi"}]"#).unwrap();
        assert_eq!(extract_text(&c), "hi");
    }

    /// **Scenario**: constructors set role, tool linkage, and the in-state
    /// id used for idempotent injection.
    #[test]
    fn constructors() {
        let m = ChatMessage::tool("ok", "call_1", "get_current_time");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(m.name.as_deref(), Some("get_current_time"));

        let m = ChatMessage::system("ctx").with_id("sys_context");
        assert_eq!(m.id.as_deref(), Some("sys_context"));
    }

    /// **Scenario**: the char/2 proxy counts unicode scalar values, not
    /// bytes.
    #[test]
    fn approx_tokens_counts_chars() {
        assert_eq!(approx_tokens("abcd"), 2);
        assert_eq!(approx_tokens("你好世界"), 2);
    }
}
