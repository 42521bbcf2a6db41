//! 多模型重试与降级
//!
//! 候选列表为 [primary, ...fallbacks]，严格串行：外层遍历候选，内层对同一候选最多尝试 max_retries 次。
//! - 首次成功立即返回
//! - 错误命中 recoverable_patterns 且不是本候选最后一次尝试：on_retry → 等待 retry_delay → 重试
//! - 本候选尝试结束（用尽或错误不可恢复）且还有下一个候选：on_fallback → 切换，attempt 归 1
//! - 最后一个候选也结束：返回 FallbackError::Exhausted
//!
//! 可恢复模式与 core::classifier 相互独立，可单独配置。

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::config::FallbackSection;
use crate::core::FallbackError;
use crate::llm::ModelConfig;

/// 重试回调：(模型, 刚失败的尝试序号, 错误)
pub type RetryCallback = Arc<dyn Fn(&ModelConfig, u32, &anyhow::Error) + Send + Sync>;

/// 降级回调：(来源模型, 目标模型, 错误)
pub type FallbackCallback = Arc<dyn Fn(&ModelConfig, &ModelConfig, &anyhow::Error) + Send + Sync>;

/// 一次降级运行的进度记录；每次调用 run 时传入当前快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackContext {
    /// 当前候选在 [primary, ...fallbacks] 中的下标
    pub model_index: usize,
    /// 当前候选的第几次尝试（从 1 开始）
    pub attempt: u32,
    /// 跨所有候选累计的尝试次数，单调递增
    pub total_attempts: u32,
    pub last_error: Option<String>,
}

/// 内置可恢复模式：限流、5xx、超时、连接重置、上下文超限、鉴权失败（凭证可能只对某个 Provider 失效）
pub fn default_recoverable_patterns() -> Vec<Regex> {
    [
        r"(?i)\b429\b|rate.?limit|too many requests",
        r"(?i)\b50[234]\b|bad gateway|service unavailable|gateway timeout|overloaded",
        r"(?i)time.?out|timed out|etimedout",
        r"(?i)econnreset|econnrefused|connection (reset|refused)|socket hang up",
        r"(?i)context.?length|context window|maximum context|too many tokens",
        r"(?i)\b40[13]\b|unauthorized|forbidden|invalid.?api.?key|authentication",
    ]
    .into_iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
}

/// 降级选项
#[derive(Clone)]
pub struct FallbackOptions {
    pub enabled: bool,
    pub recoverable_patterns: Vec<Regex>,
    /// 每个候选的最大尝试次数（至少 1）
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub on_retry: Option<RetryCallback>,
    pub on_fallback: Option<FallbackCallback>,
}

impl Default for FallbackOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            recoverable_patterns: default_recoverable_patterns(),
            max_retries: 2,
            retry_delay: Duration::from_millis(1000),
            on_retry: None,
            on_fallback: None,
        }
    }
}

impl fmt::Debug for FallbackOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackOptions")
            .field("enabled", &self.enabled)
            .field("recoverable_patterns", &self.recoverable_patterns.len())
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl FallbackOptions {
    /// 由 [llm.fallback] 配置构建；正则非法时返回错误
    pub fn from_config(section: &FallbackSection) -> Result<Self, regex::Error> {
        let recoverable_patterns = if section.recoverable_patterns.is_empty() {
            default_recoverable_patterns()
        } else {
            section
                .recoverable_patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(Self {
            enabled: section.enabled,
            recoverable_patterns,
            max_retries: section.max_retries,
            retry_delay: Duration::from_millis(section.retry_delay_ms),
            on_retry: None,
            on_fallback: None,
        })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn on_retry(
        mut self,
        f: impl Fn(&ModelConfig, u32, &anyhow::Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_retry = Some(Arc::new(f));
        self
    }

    pub fn on_fallback(
        mut self,
        f: impl Fn(&ModelConfig, &ModelConfig, &anyhow::Error) + Send + Sync + 'static,
    ) -> Self {
        self.on_fallback = Some(Arc::new(f));
        self
    }

    /// 错误消息及其 cause 链是否命中任一可恢复模式
    pub fn is_recoverable(&self, error: &anyhow::Error) -> bool {
        let text = recoverable_text(error);
        self.recoverable_patterns.iter().any(|re| re.is_match(&text))
    }
}

/// 参与模式匹配的文本：只取 `{:#}`（消息 + cause 链），不含 Debug 输出中的 backtrace
fn recoverable_text(error: &anyhow::Error) -> String {
    format!("{error:#}")
}

/// 按 [primary, ...fallbacks] 依次调用 run，直到成功或全部耗尽
///
/// run 每次收到候选模型与 FallbackContext 快照；上下文只由本函数推进。
pub async fn run_with_model_fallback<T, F, Fut>(
    primary: &ModelConfig,
    fallbacks: &[ModelConfig],
    options: &FallbackOptions,
    mut run: F,
) -> Result<T, FallbackError>
where
    F: FnMut(ModelConfig, FallbackContext) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut ctx = FallbackContext {
        model_index: 0,
        attempt: 1,
        total_attempts: 0,
        last_error: None,
    };

    if !options.enabled {
        ctx.total_attempts = 1;
        return run(primary.clone(), ctx)
            .await
            .map_err(|source| FallbackError::Run {
                model: primary.clone(),
                source,
            });
    }

    let candidates: Vec<&ModelConfig> = std::iter::once(primary).chain(fallbacks).collect();
    let max_attempts = options.max_retries.max(1);
    let mut index = 0;

    loop {
        let model = candidates[index];
        ctx.model_index = index;
        ctx.attempt = 1;

        let last_err = loop {
            ctx.total_attempts += 1;
            let err = match run(model.clone(), ctx.clone()).await {
                Ok(value) => {
                    if ctx.total_attempts > 1 {
                        tracing::info!(
                            model = %model,
                            attempt = ctx.attempt,
                            total_attempts = ctx.total_attempts,
                            "model call succeeded after retry/fallback"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };
            let message = format!("{err:#}");
            ctx.last_error = Some(message.clone());

            if ctx.attempt < max_attempts && options.is_recoverable(&err) {
                tracing::warn!(
                    model = %model,
                    attempt = ctx.attempt,
                    max_attempts,
                    error = %message,
                    "model call failed, retrying"
                );
                if let Some(cb) = &options.on_retry {
                    cb(model, ctx.attempt, &err);
                }
                if !options.retry_delay.is_zero() {
                    tokio::time::sleep(options.retry_delay).await;
                }
                ctx.attempt += 1;
                continue;
            }
            break err;
        };
        let message = format!("{last_err:#}");

        match candidates.get(index + 1) {
            Some(&next) => {
                tracing::warn!(
                    from = %model,
                    to = %next,
                    attempts = ctx.attempt,
                    error = %message,
                    "falling back to next model"
                );
                if let Some(cb) = &options.on_fallback {
                    cb(model, next, &last_err);
                }
                index += 1;
            }
            None => {
                tracing::error!(
                    model = %model,
                    total_attempts = ctx.total_attempts,
                    error = %message,
                    "all models exhausted"
                );
                return Err(FallbackError::Exhausted {
                    model: model.clone(),
                    total_attempts: ctx.total_attempts,
                    message,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn models() -> (ModelConfig, Vec<ModelConfig>) {
        (
            ModelConfig::new("deepseek", "deepseek-chat"),
            vec![
                ModelConfig::new("openai", "gpt-4o"),
                ModelConfig::new("anthropic", "claude-sonnet"),
            ],
        )
    }

    fn fast() -> FallbackOptions {
        FallbackOptions::default().with_retry_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_disabled_runs_primary_exactly_once() {
        let (primary, fallbacks) = models();
        let calls = AtomicUsize::new(0);
        let seen = Mutex::new(Vec::new());

        let result: Result<(), _> =
            run_with_model_fallback(&primary, &fallbacks, &FallbackOptions::disabled(), |m, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(m);
                async { Err(anyhow::anyhow!("429 rate limit")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![primary.clone()]);
        match result.unwrap_err() {
            FallbackError::Run { model, .. } => assert_eq!(model, primary),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_disabled_success_passes_through() {
        let (primary, fallbacks) = models();
        let value =
            run_with_model_fallback(&primary, &fallbacks, &FallbackOptions::disabled(), |m, _| {
                async move { Ok(m.model) }
            })
            .await
            .unwrap();
        assert_eq!(value, "deepseek-chat");
    }

    #[tokio::test]
    async fn test_always_retryable_exhausts_every_candidate() {
        let (primary, fallbacks) = models();
        let calls = AtomicUsize::new(0);
        let fallbacks_seen = Arc::new(Mutex::new(Vec::new()));
        let retries = Arc::new(AtomicUsize::new(0));

        let opts = {
            let fallbacks_seen = Arc::clone(&fallbacks_seen);
            let retries = Arc::clone(&retries);
            fast()
                .on_retry(move |_, _, _| {
                    retries.fetch_add(1, Ordering::SeqCst);
                })
                .on_fallback(move |from, to, _| {
                    fallbacks_seen
                        .lock()
                        .unwrap()
                        .push((from.to_string(), to.to_string()));
                })
        };

        let result: Result<(), _> = run_with_model_fallback(&primary, &fallbacks, &opts, |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("Error: 429 Too Many Requests")) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(retries.load(Ordering::SeqCst), 3);
        assert_eq!(
            *fallbacks_seen.lock().unwrap(),
            vec![
                ("deepseek/deepseek-chat".to_string(), "openai/gpt-4o".to_string()),
                ("openai/gpt-4o".to_string(), "anthropic/claude-sonnet".to_string()),
            ]
        );
        match result.unwrap_err() {
            FallbackError::Exhausted {
                model,
                total_attempts,
                message,
            } => {
                assert_eq!(model, fallbacks[1]);
                assert_eq!(total_attempts, 6);
                assert!(message.contains("429"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let (primary, fallbacks) = models();
        let calls = AtomicUsize::new(0);
        let value = run_with_model_fallback(&primary, &fallbacks, &fast(), |m, ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                assert_eq!(ctx.total_attempts, 1);
                Ok(m)
            }
        })
        .await
        .unwrap();

        assert_eq!(value, primary);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_recoverable_error_skips_remaining_attempts() {
        let (primary, fallbacks) = models();
        let seen = Mutex::new(Vec::new());

        let value = run_with_model_fallback(&primary, &fallbacks, &fast(), |m, ctx| {
            seen.lock().unwrap().push((m.to_string(), ctx.attempt));
            async move {
                if m.provider == "deepseek" {
                    Err(anyhow::anyhow!("unexpected token in response"))
                } else {
                    Ok("recovered")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "recovered");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("deepseek/deepseek-chat".to_string(), 1),
                ("openai/gpt-4o".to_string(), 1),
            ]
        );
    }

    #[tokio::test]
    async fn test_retry_then_success_on_same_model() {
        let (primary, fallbacks) = models();
        let contexts = Mutex::new(Vec::new());

        let value = run_with_model_fallback(&primary, &fallbacks, &fast(), |m, ctx| {
            contexts.lock().unwrap().push(ctx.clone());
            async move {
                if ctx.attempt == 1 {
                    Err(anyhow::anyhow!("503 service unavailable"))
                } else {
                    Ok(m)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, primary);
        let contexts = contexts.lock().unwrap();
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[1].model_index, 0);
        assert_eq!(contexts[1].attempt, 2);
        assert_eq!(contexts[1].total_attempts, 2);
        assert!(contexts[1]
            .last_error
            .as_deref()
            .unwrap()
            .contains("503"));
    }

    #[tokio::test]
    async fn test_auth_failure_falls_back() {
        let (primary, fallbacks) = models();
        let opts = fast().with_max_retries(1);
        let value = run_with_model_fallback(&primary, &fallbacks, &opts, |m, ctx| async move {
            match ctx.model_index {
                0 => Err(anyhow::anyhow!("401 Unauthorized")),
                _ => Ok(m),
            }
        })
        .await
        .unwrap();
        assert_eq!(value, fallbacks[0]);
    }

    #[tokio::test]
    async fn test_total_attempts_is_monotonic() {
        let (primary, fallbacks) = models();
        let totals = Mutex::new(Vec::new());
        let _: Result<(), _> = run_with_model_fallback(&primary, &fallbacks, &fast(), |_, ctx| {
            totals.lock().unwrap().push(ctx.total_attempts);
            async { Err(anyhow::anyhow!("timed out")) }
        })
        .await;
        assert_eq!(*totals.lock().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_delay() {
        let (primary, _) = models();
        let opts = FallbackOptions::default().with_retry_delay(Duration::from_millis(1000));
        let started = tokio::time::Instant::now();
        let _: Result<(), _> = run_with_model_fallback(&primary, &[], &opts, |_, _| async {
            Err(anyhow::anyhow!("ECONNRESET"))
        })
        .await;
        // 单个候选、2 次尝试：中间等待一次
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert!(started.elapsed() < Duration::from_millis(2000));
    }

    #[test]
    fn test_from_config_rejects_bad_regex() {
        let section = FallbackSection {
            recoverable_patterns: vec!["(unclosed".to_string()],
            ..FallbackSection::default()
        };
        assert!(FallbackOptions::from_config(&section).is_err());
    }

    #[test]
    fn test_default_patterns() {
        let opts = FallbackOptions::default();
        assert_eq!(opts.recoverable_patterns.len(), 6);
        for msg in [
            "429 Too Many Requests",
            "502 Bad Gateway",
            "request timeout",
            "ECONNRESET",
            "maximum context length exceeded",
            "403 Forbidden",
        ] {
            assert!(opts.is_recoverable(&anyhow::anyhow!("{msg}")), "{msg}");
        }
        assert!(!opts.is_recoverable(&anyhow::anyhow!("unexpected token")));
    }

    #[test]
    fn test_matching_ignores_debug_output() {
        let err = anyhow::anyhow!("unexpected token in response").context("parse reply");
        assert_eq!(
            recoverable_text(&err),
            "parse reply: unexpected token in response"
        );

        // Debug 输出含 "Caused by:" 段（开启 RUST_BACKTRACE 时还有 file:line:col 帧）
        assert!(format!("{err:?}").contains("Caused by"));
        let opts = FallbackOptions {
            recoverable_patterns: vec![Regex::new("Caused by|Stack backtrace").unwrap()],
            ..fast()
        };
        assert!(!opts.is_recoverable(&err));
        assert!(!FallbackOptions::default().is_recoverable(&err));
    }

    #[test]
    fn test_recoverable_cause_anywhere_in_chain() {
        let err = anyhow::anyhow!("503 Service Unavailable").context("call deepseek/deepseek-chat");
        assert!(FallbackOptions::default().is_recoverable(&err));
    }
}
