//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册。
//! 执行前先做状态检查，不可调用时直接返回失败结果而不调用工具；
//! 工具返回 Err、panic 或超时都转为 success=false 的 ToolResult，execute / execute_all 从不向上抛错。

use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ToolsSection;
use crate::core::RegistryError;
use crate::tools::{CredentialLookup, ToolStatus, ToolStatusChecker, ToolStatusInfo};

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、凭证需求、异步执行（args 为 JSON）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（注册表中的唯一键）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认不限参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 是否需要凭证才能调用
    fn requires_credential(&self) -> bool {
        false
    }

    fn credential_name(&self) -> Option<&str> {
        None
    }

    /// 自定义状态检查；返回 Some 时取代默认的凭证检查
    fn status(&self, _credentials: &dyn CredentialLookup) -> Option<ToolStatusInfo> {
        None
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 模型发起的一次工具调用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", uuid::Uuid::new_v4()),
            name: name.into(),
            arguments,
        }
    }
}

/// 工具调用结果（回传给模型）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, output: String) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn fail(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// 工具注册表：按名称存储 Arc<dyn Tool>，重名注册会被拒绝
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    checker: ToolStatusChecker,
    disabled: HashSet<String>,
    timeout: Option<Duration>,
}

impl ToolRegistry {
    pub fn new(checker: ToolStatusChecker) -> Self {
        Self {
            tools: BTreeMap::new(),
            checker,
            disabled: HashSet::new(),
            timeout: None,
        }
    }

    /// 按 [tools] 配置创建：禁用列表与单次调用超时
    pub fn from_config(section: &ToolsSection, checker: ToolStatusChecker) -> Self {
        let mut registry = Self::new(checker).with_disabled(section.disabled.iter().cloned());
        if section.tool_timeout_secs > 0 {
            registry = registry.with_timeout(Duration::from_secs(section.tool_timeout_secs));
        }
        registry
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_disabled(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.disabled.extend(names);
        self
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        tracing::debug!(tool = %name, "registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// 单个工具的当前状态；未注册返回 None
    pub fn status(&self, name: &str) -> Option<ToolStatusInfo> {
        self.tools.get(name).map(|tool| self.status_of(tool.as_ref()))
    }

    fn status_of(&self, tool: &dyn Tool) -> ToolStatusInfo {
        if self.disabled.contains(tool.name()) {
            return ToolStatusInfo::unavailable(
                tool.name(),
                ToolStatus::Disabled,
                format!("Tool '{}' is disabled by configuration", tool.name()),
            );
        }
        self.checker.check_tool(tool)
    }

    /// 所有工具的状态（按名称排序）
    pub fn tool_statuses(&self) -> Vec<ToolStatusInfo> {
        self.tools
            .values()
            .map(|tool| self.status_of(tool.as_ref()))
            .collect()
    }

    /// 当前可调用的工具；用于构造提供给模型的工具列表
    pub fn callable_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools
            .values()
            .filter(|tool| self.status_of(tool.as_ref()).is_callable)
            .cloned()
            .collect()
    }

    /// 可调用工具的定义（name / description / parameters），直接放入模型请求
    pub fn tool_definitions(&self) -> Vec<Value> {
        self.callable_tools()
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect()
    }

    /// 执行一次工具调用；所有失败都转为 success=false 的结果，并输出 JSON 审计日志
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let (result, outcome) = self.execute_inner(call).await;

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "ok": result.success,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.arguments),
        });
        tracing::info!(audit = %audit, "tool");

        result
    }

    async fn execute_inner(&self, call: &ToolCall) -> (ToolResult, &'static str) {
        let Some(tool) = self.tools.get(&call.name) else {
            return (
                ToolResult::fail(call, format!("Tool not found: {}", call.name)),
                "not_found",
            );
        };

        let status = self.status_of(tool.as_ref());
        if !status.is_callable {
            tracing::warn!(tool = %call.name, status = ?status.status, "tool not callable");
            return (
                ToolResult::fail(
                    call,
                    format!("Tool '{}' is not available: {}", call.name, status.message),
                ),
                "unavailable",
            );
        }

        let guarded = AssertUnwindSafe(tool.execute(call.arguments.clone())).catch_unwind();
        let finished = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(r) => r,
                Err(_) => {
                    return (
                        ToolResult::fail(
                            call,
                            format!("Tool '{}' timed out after {}s", call.name, limit.as_secs_f64()),
                        ),
                        "timeout",
                    );
                }
            },
            None => guarded.await,
        };

        match finished {
            Ok(Ok(output)) => (ToolResult::ok(call, output), "ok"),
            Ok(Err(e)) => (ToolResult::fail(call, e), "error"),
            Err(_) => (
                ToolResult::fail(call, format!("Tool '{}' panicked", call.name)),
                "panic",
            ),
        }
    }

    /// 按顺序逐个执行；单个失败不影响后续调用
    pub async fn execute_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(call).await);
        }
        results
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    let mut chars = s.chars();
    let head: String = chars.by_ref().take(200).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        s
    }
}
