//! Bee Runtime - 智能体执行控制核心
//!
//! 模块划分：
//! - **agent**: 组合三者的运行时（Lane 排队 → 模型降级 → 工具执行）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、错误分类、分道任务调度
//! - **llm**: 模型配置、后端抽象、多模型重试/降级、Mock 后端
//! - **observability**: tracing 初始化
//! - **tools**: 工具注册表、可用性检查、凭证查询

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod tools;

pub use agent::{AgentRuntime, TurnOutcome};
pub use core::{classify, ErrorKind, LaneKind, LaneScheduler};
pub use llm::{run_with_model_fallback, FallbackOptions, ModelConfig};
pub use tools::{Tool, ToolCall, ToolRegistry, ToolResult};
