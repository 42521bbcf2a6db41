//! Bee Runtime 演示入口
//!
//! 初始化日志、加载配置、用 Mock 后端与 echo 工具组装运行时，在 main Lane 上跑一轮并打印结果（JSON）。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bee_runtime::{
    config::load_config,
    llm::MockBackend,
    observability,
    tools::{EchoTool, EnvCredentials, ToolStatusChecker},
    AgentRuntime, LaneKind, ToolRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    // 可选：第一个参数为额外配置文件
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;

    let checker = ToolStatusChecker::new(Arc::new(EnvCredentials));
    let mut tools = ToolRegistry::from_config(&config.tools, checker);
    tools.register(EchoTool).context("Failed to register tools")?;

    let runtime = AgentRuntime::from_config(&config, tools, Arc::new(MockBackend::new()))
        .context("Failed to build runtime")?;

    for status in runtime.tools().tool_statuses() {
        tracing::info!(tool = %status.name, status = ?status.status, "{}", status.message);
    }

    let outcome = runtime
        .run_turn(LaneKind::Main, "hello from bee-runtime")
        .await
        .context("Turn failed")?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}
