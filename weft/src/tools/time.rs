//! Current wall-clock time tool.

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::{Tool, ToolError, ToolSpec};

/// Reports the current time; takes no arguments.
pub struct GetCurrentTime;

#[async_trait]
impl Tool for GetCurrentTime {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_current_time".into(),
            description: Some("获取当前日期和时间".into()),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
            }),
        }
    }

    async fn call(&self, _arguments: &Value) -> Result<String, ToolError> {
        Ok(chrono::Local::now()
            .format("%Y-%m-%d %H:%M:%S")
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: the tool returns a timestamp in the documented shape.
    #[tokio::test]
    async fn returns_formatted_timestamp() {
        let out = GetCurrentTime.call(&serde_json::json!({})).await.unwrap();
        assert_eq!(out.len(), 19);
        assert_eq!(&out[4..5], "-");
        assert_eq!(&out[13..14], ":");
    }
}
