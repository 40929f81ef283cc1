//! Wire-level event: one JSON record per line on the chat stream.
//!
//! Field names are camelCase on the wire (the UI consumes them directly).
//! Ordering contract: every `chunk` / `tool_start` / `tool_end` precedes
//! `done`; `done` is emitted exactly once, last; `error` is terminal and
//! replaces `done`.

use serde::{Deserialize, Serialize};

/// One stream record. `type` tags the variant on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// One forwarded token delta. `message_id` is a placeholder (-1) until
    /// the assistant message is persisted.
    Chunk {
        content: String,
        #[serde(rename = "conversationId")]
        conversation_id: i64,
        #[serde(rename = "messageId")]
        message_id: i64,
    },
    /// A tool invocation began.
    ToolStart {
        tool: String,
        #[serde(rename = "conversationId")]
        conversation_id: i64,
    },
    /// A tool invocation finished.
    ToolEnd {
        tool: String,
        #[serde(rename = "conversationId")]
        conversation_id: i64,
    },
    /// Terminal success record; carries the persisted ids.
    Done {
        #[serde(rename = "messageId")]
        message_id: i64,
        #[serde(rename = "conversationId")]
        conversation_id: i64,
        #[serde(rename = "parentId")]
        parent_id: Option<i64>,
        #[serde(rename = "userMessageId")]
        user_message_id: Option<i64>,
        #[serde(rename = "tokenCount")]
        token_count: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    /// Terminal failure record; no `done` follows.
    Error { message: String, code: String },
}

/// Serializes an event as one newline-terminated JSON line.
pub fn to_json_line(event: &TransportEvent) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: chunk serializes with camelCase ids and the type tag.
    #[test]
    fn chunk_wire_shape() {
        let ev = TransportEvent::Chunk {
            content: "he".into(),
            conversation_id: 100,
            message_id: -1,
        };
        let line = to_json_line(&ev).unwrap();
        assert!(line.ends_with('\n'));
        let v: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(v["type"], "chunk");
        assert_eq!(v["content"], "he");
        assert_eq!(v["conversationId"], 100);
        assert_eq!(v["messageId"], -1);
    }

    /// **Scenario**: done carries ids, token count, and an optional title.
    #[test]
    fn done_wire_shape_with_and_without_title() {
        let ev = TransportEvent::Done {
            message_id: 7,
            conversation_id: 100,
            parent_id: Some(6),
            user_message_id: Some(6),
            token_count: 5,
            title: Some("打招呼".into()),
        };
        let v: serde_json::Value =
            serde_json::from_str(to_json_line(&ev).unwrap().trim()).unwrap();
        assert_eq!(v["type"], "done");
        assert_eq!(v["parentId"], 6);
        assert_eq!(v["userMessageId"], 6);
        assert_eq!(v["tokenCount"], 5);
        assert_eq!(v["title"], "打招呼");

        let ev = TransportEvent::Done {
            message_id: 7,
            conversation_id: 100,
            parent_id: None,
            user_message_id: None,
            token_count: 0,
            title: None,
        };
        let v: serde_json::Value =
            serde_json::from_str(to_json_line(&ev).unwrap().trim()).unwrap();
        assert!(v.get("title").is_none(), "absent title is omitted");
        assert_eq!(v["parentId"], serde_json::Value::Null);
    }

    /// **Scenario**: tool events tag the tool name; error carries a stable code.
    #[test]
    fn tool_and_error_wire_shape() {
        let start = TransportEvent::ToolStart {
            tool: "get_current_time".into(),
            conversation_id: 1,
        };
        let v: serde_json::Value =
            serde_json::from_str(to_json_line(&start).unwrap().trim()).unwrap();
        assert_eq!(v["type"], "tool_start");
        assert_eq!(v["tool"], "get_current_time");

        let err = TransportEvent::Error {
            message: "provider unavailable".into(),
            code: "PROVIDER-502".into(),
        };
        let v: serde_json::Value =
            serde_json::from_str(to_json_line(&err).unwrap().trim()).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["code"], "PROVIDER-502");
    }

    /// **Scenario**: events round-trip through serde (client-side decode).
    #[test]
    fn round_trip_decode() {
        let ev = TransportEvent::ToolEnd {
            tool: "simple_calculator".into(),
            conversation_id: 3,
        };
        let line = to_json_line(&ev).unwrap();
        let back: TransportEvent = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(back, ev);
    }
}
