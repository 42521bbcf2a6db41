//! 工具可用性检查
//!
//! 调用前根据工具声明的前置条件（目前是凭证）判断能否调用；工具可提供自定义检查，优先于默认规则。

use std::sync::Arc;

use serde::Serialize;

use crate::tools::{CredentialLookup, Tool};

/// 工具状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolStatus {
    Available,
    /// 所需凭证缺失
    MissingConfig,
    /// 声明需要凭证却没给出凭证名
    InvalidConfig,
    /// 被配置禁用
    Disabled,
}

/// 派生的状态信息（不持久化）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolStatusInfo {
    pub name: String,
    pub status: ToolStatus,
    pub message: String,
    pub missing_configs: Vec<String>,
    pub is_callable: bool,
}

impl ToolStatusInfo {
    pub fn available(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ToolStatus::Available,
            message: "Tool is available".to_string(),
            missing_configs: Vec::new(),
            is_callable: true,
        }
    }

    /// 不可调用的状态
    pub fn unavailable(
        name: impl Into<String>,
        status: ToolStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            message: message.into(),
            missing_configs: Vec::new(),
            is_callable: false,
        }
    }
}

/// 默认状态检查器：持有注入的凭证查询能力
#[derive(Clone)]
pub struct ToolStatusChecker {
    credentials: Arc<dyn CredentialLookup>,
}

impl ToolStatusChecker {
    pub fn new(credentials: Arc<dyn CredentialLookup>) -> Self {
        Self { credentials }
    }

    pub fn credentials(&self) -> &dyn CredentialLookup {
        self.credentials.as_ref()
    }

    /// 纯判定：无需求 → 可用；有需求无凭证名 → 配置无效；凭证缺失 → 缺配置；否则可用
    pub fn check_status(
        &self,
        name: &str,
        requires_credential: bool,
        credential_name: Option<&str>,
    ) -> ToolStatusInfo {
        if !requires_credential {
            return ToolStatusInfo::available(name);
        }

        let credential = match credential_name.map(str::trim) {
            Some(c) if !c.is_empty() => c,
            _ => {
                return ToolStatusInfo::unavailable(
                    name,
                    ToolStatus::InvalidConfig,
                    format!("Tool '{name}' requires a credential but does not name one"),
                );
            }
        };

        if self.credentials.has_credential(credential) {
            ToolStatusInfo::available(name)
        } else {
            ToolStatusInfo {
                missing_configs: vec![credential.to_string()],
                ..ToolStatusInfo::unavailable(
                    name,
                    ToolStatus::MissingConfig,
                    format!("Tool '{name}' is missing credential {credential}"),
                )
            }
        }
    }

    /// 检查一个工具：自定义检查优先，否则按其声明的凭证需求判定
    pub fn check_tool(&self, tool: &dyn Tool) -> ToolStatusInfo {
        if let Some(info) = tool.status(self.credentials.as_ref()) {
            return info;
        }
        self.check_status(
            tool.name(),
            tool.requires_credential(),
            tool.credential_name(),
        )
    }
}
