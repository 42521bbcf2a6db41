//! 凭证查询能力
//!
//! 状态检查器只需要知道「某个凭证是否存在」，不接触凭证内容；实现方在构造时注入。

use std::collections::HashSet;
use std::sync::RwLock;

/// 凭证查询：name 对应的凭证当前是否可用
pub trait CredentialLookup: Send + Sync {
    fn has_credential(&self, name: &str) -> bool;
}

/// 从环境变量读取：变量存在且非空即视为可用
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl CredentialLookup for EnvCredentials {
    fn has_credential(&self, name: &str) -> bool {
        std::env::var(name)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }
}

/// 内存凭证集合，运行时可增删（测试与嵌入式场景）
#[derive(Debug, Default)]
pub struct InMemoryCredentials {
    names: RwLock<HashSet<String>>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            names: RwLock::new(names.into_iter().map(Into::into).collect()),
        }
    }

    pub fn insert(&self, name: impl Into<String>) {
        if let Ok(mut names) = self.names.write() {
            names.insert(name.into());
        }
    }

    pub fn remove(&self, name: &str) {
        if let Ok(mut names) = self.names.write() {
            names.remove(name);
        }
    }
}

impl CredentialLookup for InMemoryCredentials {
    fn has_credential(&self, name: &str) -> bool {
        self.names
            .read()
            .map(|names| names.contains(name))
            .unwrap_or(false)
    }
}
