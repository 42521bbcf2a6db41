//! Agent 运行时：把分道调度、模型降级与工具注册表组合成「一轮对话」
//!
//! 每个组件在进程启动时显式创建并注入（无全局单例），测试中可并存多个互相隔离的运行时。
//! 一轮 = 在 Lane 上排队 → 经降级运行器调用模型（只提供可调用工具）→ 顺序执行模型返回的工具调用。

use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;

use crate::config::AppConfig;
use crate::core::{classify, LaneError, LaneScheduler};
use crate::llm::{
    run_with_model_fallback, FallbackOptions, ModelBackend, ModelConfig, ModelReply, ModelRequest,
};
use crate::tools::{ToolRegistry, ToolResult};

/// 一轮对话的结果
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// 最终给出回复的模型
    pub model: ModelConfig,
    pub reply: ModelReply,
    /// 与 reply.tool_calls 一一对应
    pub tool_results: Vec<ToolResult>,
}

/// Agent 运行时
pub struct AgentRuntime {
    lanes: LaneScheduler,
    tools: Arc<ToolRegistry>,
    backend: Arc<dyn ModelBackend>,
    primary: ModelConfig,
    fallbacks: Vec<ModelConfig>,
    fallback_options: FallbackOptions,
}

impl AgentRuntime {
    pub fn new(
        lanes: LaneScheduler,
        tools: ToolRegistry,
        backend: Arc<dyn ModelBackend>,
        primary: ModelConfig,
        fallbacks: Vec<ModelConfig>,
        fallback_options: FallbackOptions,
    ) -> Self {
        Self {
            lanes,
            tools: Arc::new(tools),
            backend,
            primary,
            fallbacks,
            fallback_options,
        }
    }

    /// 按配置组装：Lane 预设、主/降级模型、降级选项；tools 由调用方注册好后传入
    pub fn from_config(
        config: &AppConfig,
        tools: ToolRegistry,
        backend: Arc<dyn ModelBackend>,
    ) -> anyhow::Result<Self> {
        let primary: ModelConfig = config
            .llm
            .primary
            .parse()
            .map_err(anyhow::Error::msg)
            .context("invalid llm.primary")?;
        let fallbacks = config
            .llm
            .fallbacks
            .iter()
            .map(|s| s.parse::<ModelConfig>().map_err(anyhow::Error::msg))
            .collect::<anyhow::Result<Vec<_>>>()
            .context("invalid llm.fallbacks")?;
        let fallback_options = FallbackOptions::from_config(&config.llm.fallback)
            .context("invalid llm.fallback.recoverable_patterns")?;

        Ok(Self::new(
            LaneScheduler::from_config(&config.lanes),
            tools,
            backend,
            primary,
            fallbacks,
            fallback_options,
        ))
    }

    pub fn lanes(&self) -> &LaneScheduler {
        &self.lanes
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// 在指定 Lane 上执行一轮；模型全部失败时返回 LaneError::Task(FallbackError)
    pub async fn run_turn(
        &self,
        lane: impl AsRef<str>,
        prompt: impl Into<String>,
    ) -> Result<TurnOutcome, LaneError> {
        let tools = Arc::clone(&self.tools);
        let backend = Arc::clone(&self.backend);
        let primary = self.primary.clone();
        let fallbacks = self.fallbacks.clone();
        let options = self.fallback_options.clone();
        let mut request = ModelRequest::new(prompt);

        let turn = async move {
            request.tools = tools.tool_definitions();

            let (model, reply) =
                run_with_model_fallback(&primary, &fallbacks, &options, |model, _ctx| {
                    let backend = Arc::clone(&backend);
                    let request = request.clone();
                    async move {
                        let reply = backend.complete(&model, &request).await?;
                        Ok::<_, anyhow::Error>((model, reply))
                    }
                })
                .await?;

            let tool_results = tools.execute_all(&reply.tool_calls).await;
            Ok::<_, anyhow::Error>(TurnOutcome {
                model,
                reply,
                tool_results,
            })
        };

        let lane = lane.as_ref().to_string();
        let result = self.lanes.enqueue(lane.as_str(), turn).await;
        if let Err(e) = &result {
            tracing::error!(lane = %lane, kind = %classify(e), error = %e, "turn failed");
        }
        result
    }
}
