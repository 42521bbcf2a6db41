//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__LLM__PRIMARY=openai/gpt-4o`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub lanes: LanesSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
}

/// [lanes] 段：慢等待告警阈值与各 Lane 的并发上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LanesSection {
    /// 排队超过该毫秒数时输出告警
    pub default_warn_after_ms: u64,
    /// Lane 名 → 并发上限（小于 1 时按 1 处理）
    pub concurrency: HashMap<String, usize>,
}

impl Default for LanesSection {
    fn default() -> Self {
        Self {
            default_warn_after_ms: 2000,
            concurrency: default_lane_concurrency(),
        }
    }
}

fn default_lane_concurrency() -> HashMap<String, usize> {
    [("main", 1), ("cron", 1), ("subagent", 4), ("nested", 1)]
        .into_iter()
        .map(|(lane, n)| (lane.to_string(), n))
        .collect()
}

/// [llm] 段：主模型与按优先级排列的降级模型（格式 provider/model）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub primary: String,
    pub fallbacks: Vec<String>,
    pub fallback: FallbackSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            primary: "deepseek/deepseek-chat".to_string(),
            fallbacks: Vec::new(),
            fallback: FallbackSection::default(),
        }
    }
}

/// [llm.fallback] 段：重试与降级策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackSection {
    pub enabled: bool,
    /// 每个候选模型的最大尝试次数
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// 可恢复错误的正则；为空时使用内置默认集合
    pub recoverable_patterns: Vec<String>,
}

impl Default for FallbackSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            retry_delay_ms: 1000,
            recoverable_patterns: Vec::new(),
        }
    }
}

/// [tools] 段：单次调用超时与禁用列表
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒），0 表示不限
    pub tool_timeout_secs: u64,
    /// 被禁用的工具名（仍注册，但不可调用）
    pub disabled: Vec<String>,
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
