//! Echo 工具（测试与演示用）

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::tools::Tool;

/// echo 的参数（仅用于反序列化与 Schema 生成）
#[derive(Debug, Deserialize, JsonSchema)]
struct EchoArgs {
    /// 要回显的文本
    #[serde(default)]
    text: Option<String>,
}

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo text (for testing). Args: {\"text\": \"message\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schema_for!(EchoArgs)).unwrap_or_else(|_| {
            serde_json::json!({ "type": "object", "properties": {}, "required": [] })
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: EchoArgs = if args.is_null() {
            EchoArgs { text: None }
        } else {
            serde_json::from_value(args).map_err(|e| format!("invalid echo args: {e}"))?
        };
        Ok(args.text.unwrap_or_else(|| "(empty)".to_string()))
    }
}
