//! 错误分类器
//!
//! 将错误文本映射为 Recoverable / Retryable / Fatal 三类，供降级运行器和 Provider 层决定
//! 「继续 / 同模型重试 / 切换模型」。纯词法匹配（小写子串），不依赖各家 Provider 的错误码结构。

use std::fmt;

use serde::Serialize;

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// 默认：可以继续，无需特殊处理
    Recoverable,
    /// 暂时性故障：延迟后重试同一模型
    Retryable,
    /// 同模型重试无意义：应切换候选模型
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        self == ErrorKind::Retryable
    }

    pub fn is_fatal(self) -> bool {
        self == ErrorKind::Fatal
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Recoverable => "RECOVERABLE",
            ErrorKind::Retryable => "RETRYABLE",
            ErrorKind::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const CONTEXT_OVERFLOW_KEYWORDS: &[&str] = &[
    "context length",
    "context_length",
    "maximum context",
    "context window",
    "too many tokens",
    "token limit",
    "prompt is too long",
];

const AUTH_KEYWORDS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "forbidden",
    "invalid api key",
    "invalid_api_key",
    "incorrect api key",
    "authentication",
    "permission denied",
];

const TRANSIENT_KEYWORDS: &[&str] = &[
    "429",
    "rate limit",
    "rate_limit",
    "too many requests",
    "500",
    "502",
    "503",
    "504",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "overloaded",
    "timeout",
    "timed out",
    "etimedout",
    "econnreset",
    "econnrefused",
    "connection reset",
    "connection refused",
    "socket hang up",
    "network",
];

/// 对任意可显示的错误分类（anyhow::Error 取 `{:#}` 以包含整条 cause 链）
pub fn classify(error: &(impl fmt::Display + ?Sized)) -> ErrorKind {
    classify_message(&format!("{error:#}"))
}

/// 按固定优先级匹配：上下文超限 → 鉴权失败 → 网络/限流/服务端错误 → 默认可继续
pub fn classify_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let hit = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if hit(CONTEXT_OVERFLOW_KEYWORDS) {
        ErrorKind::Fatal
    } else if hit(AUTH_KEYWORDS) {
        ErrorKind::Fatal
    } else if hit(TRANSIENT_KEYWORDS) {
        ErrorKind::Retryable
    } else {
        ErrorKind::Recoverable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit_is_retryable() {
        assert_eq!(
            classify_message("Error: 429 Too Many Requests"),
            ErrorKind::Retryable
        );
    }

    #[test]
    fn test_classify_context_overflow_is_fatal() {
        assert_eq!(
            classify_message("maximum context length exceeded"),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_classify_auth_is_fatal() {
        assert_eq!(classify_message("invalid api key (401)"), ErrorKind::Fatal);
        assert_eq!(classify_message("403 Forbidden"), ErrorKind::Fatal);
    }

    #[test]
    fn test_classify_unknown_is_recoverable() {
        assert_eq!(classify_message("unexpected token"), ErrorKind::Recoverable);
        assert_eq!(classify_message(""), ErrorKind::Recoverable);
    }

    #[test]
    fn test_classify_transient_server_errors() {
        for msg in [
            "502 Bad Gateway",
            "upstream returned 503",
            "request timed out after 60s",
            "read ECONNRESET",
            "Network is unreachable",
        ] {
            assert_eq!(classify_message(msg), ErrorKind::Retryable, "{msg}");
        }
    }

    #[test]
    fn test_context_overflow_wins_over_transient() {
        // 同时命中两组关键词时按优先级取 Fatal
        assert_eq!(
            classify_message("503: prompt is too long for this model"),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        assert_eq!(classify_message("RATE LIMIT reached"), ErrorKind::Retryable);
        assert_eq!(classify_message("Unauthorized"), ErrorKind::Fatal);
    }

    #[test]
    fn test_classify_anyhow_chain() {
        let err = anyhow::anyhow!("connection reset by peer").context("calling provider");
        assert_eq!(classify(&err), ErrorKind::Retryable);
    }

    #[test]
    fn test_error_kind_helpers() {
        assert!(ErrorKind::Retryable.is_retryable());
        assert!(ErrorKind::Fatal.is_fatal());
        assert!(!ErrorKind::Recoverable.is_fatal());
        assert_eq!(ErrorKind::Fatal.to_string(), "FATAL");
    }
}
