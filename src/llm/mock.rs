//! Mock 模型后端（用于测试与演示，无需 API）
//!
//! 回显 prompt；若请求中提供了 echo 工具，则附带一个 echo 工具调用，便于本地跑通「模型 → 工具」流程。
//! 可为指定模型设置固定错误，用来演练重试与降级。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::llm::{ModelBackend, ModelConfig, ModelReply, ModelRequest};
use crate::tools::ToolCall;

/// Mock 后端：按模型注入失败，其余模型回显
#[derive(Debug, Default)]
pub struct MockBackend {
    /// `provider/model` → 该模型每次调用都返回的错误文本
    failures: HashMap<String, String>,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让某个模型的每次调用都以 message 失败
    pub fn fail_model(mut self, model: &ModelConfig, message: impl Into<String>) -> Self {
        self.failures.insert(model.to_string(), message.into());
        self
    }

    /// 累计调用次数（含失败）
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    async fn complete(
        &self,
        model: &ModelConfig,
        request: &ModelRequest,
    ) -> anyhow::Result<ModelReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.failures.get(&model.to_string()) {
            anyhow::bail!("{message}");
        }

        let offers_echo = request
            .tools
            .iter()
            .any(|t| t.get("name").and_then(|n| n.as_str()) == Some("echo"));
        let tool_calls = if offers_echo {
            vec![ToolCall::new(
                "echo",
                serde_json::json!({ "text": format!("Echo from Mock: {}", request.prompt) }),
            )]
        } else {
            Vec::new()
        };

        Ok(ModelReply {
            content: format!("[{model}] {}", request.prompt),
            tool_calls,
        })
    }
}
