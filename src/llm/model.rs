//! 模型配置与后端抽象
//!
//! ModelConfig 是 (provider, model) 值对，按值比较和打印；真正的网络调用由实现 ModelBackend 的外部客户端完成。

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tools::ToolCall;

/// 一个候选模型：provider + model，打印为 `provider/model`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

impl FromStr for ModelConfig {
    type Err = String;

    /// 解析 `provider/model`；model 部分允许再含 `/`（如 openrouter/meta/llama）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| format!("invalid model '{s}': expected provider/model"))?;
        if provider.is_empty() || model.is_empty() {
            return Err(format!("invalid model '{s}': expected provider/model"));
        }
        Ok(Self::new(provider, model))
    }
}

/// 一轮对话发给模型的请求
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelRequest {
    pub prompt: String,
    /// 当前可调用工具的定义（name / description / parameters）
    pub tools: Vec<serde_json::Value>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            tools: Vec::new(),
        }
    }
}

/// 模型回复：文本 + 需要执行的工具调用
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelReply {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// 模型后端：对指定 ModelConfig 发起一次补全
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn complete(
        &self,
        model: &ModelConfig,
        request: &ModelRequest,
    ) -> anyhow::Result<ModelReply>;
}
