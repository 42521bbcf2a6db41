//! 执行控制层错误类型
//!
//! LaneError 由分道调度器交给调用方；FallbackError 仅在所有候选模型耗尽后抛出；
//! RegistryError 只出现在启动期的工具注册阶段（执行期的工具失败一律转为 ToolResult）。

use thiserror::Error;

use crate::llm::ModelConfig;

/// 分道任务的结果错误：任务自身的错误原样透传，其余为调度器附加的终止原因
#[derive(Error, Debug)]
pub enum LaneError {
    /// 任务自身返回的错误（不做包装）
    #[error(transparent)]
    Task(anyhow::Error),

    /// 尚未开始的任务被 clear_lane 丢弃
    #[error("task cleared from lane '{lane}' before it started")]
    Cleared { lane: String },

    #[error("task panicked in lane '{lane}'")]
    Panicked { lane: String },

    /// 结果通道被意外关闭（运行时关闭等）
    #[error("task in lane '{lane}' was dropped before settling")]
    Dropped { lane: String },
}

impl LaneError {
    /// 是否为 clear_lane 造成的取消
    pub fn is_cleared(&self) -> bool {
        matches!(self, LaneError::Cleared { .. })
    }

    /// 取回任务自身的错误（若有）
    pub fn into_task_error(self) -> Option<anyhow::Error> {
        match self {
            LaneError::Task(e) => Some(e),
            _ => None,
        }
    }
}

/// 模型降级运行器的终止错误
#[derive(Error, Debug)]
pub enum FallbackError {
    /// 降级关闭时，主模型唯一一次调用的错误
    #[error("model {model} failed: {source:#}")]
    Run {
        model: ModelConfig,
        #[source]
        source: anyhow::Error,
    },

    /// 所有候选模型的尝试次数均已用尽
    #[error("all models failed after {total_attempts} attempts; last tried {model}: {message}")]
    Exhausted {
        model: ModelConfig,
        total_attempts: u32,
        message: String,
    },
}

impl FallbackError {
    /// 最后一次尝试的模型
    pub fn model(&self) -> &ModelConfig {
        match self {
            FallbackError::Run { model, .. } | FallbackError::Exhausted { model, .. } => model,
        }
    }
}

/// 工具注册错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),
}
