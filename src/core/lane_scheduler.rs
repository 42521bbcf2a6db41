//! 分道任务调度：每条 Lane 一个 FIFO 队列 + 独立并发上限
//!
//! - enqueue 同步入队（队列深度立即可见），返回一个在任务结束时完成的 future，任务的值/错误原样透传
//! - drain 是带单飞标记（draining）的显式循环：active < max 且队列非空时出队并 spawn
//! - 任务结束时先释放 active 并重新 drain，再把结果交给调用方，下一个任务无需等待调用方被唤醒
//! - clear_lane 只丢弃尚未开始的条目，并以 LaneError::Cleared 结束它们
//!
//! 锁只在同步记账时持有，从不跨越 `.await`。

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::config::LanesSection;
use crate::core::LaneError;

/// 空白 Lane 名归一到的默认 Lane
pub const DEFAULT_LANE: &str = "main";

/// 默认慢等待告警阈值
pub const DEFAULT_WARN_AFTER: Duration = Duration::from_millis(2000);

/// 内置 Lane 类型；API 同时接受任意字符串名
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum LaneKind {
    /// 前台对话轮次
    Main,
    /// 定时任务
    Cron,
    /// 子 Agent
    Subagent,
    /// 嵌套调用（Agent 内部再发起的轮次）
    Nested,
}

impl LaneKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LaneKind::Main => "main",
            LaneKind::Cron => "cron",
            LaneKind::Subagent => "subagent",
            LaneKind::Nested => "nested",
        }
    }
}

impl AsRef<str> for LaneKind {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// 入队选项
#[derive(Clone, Copy, Debug)]
pub struct EnqueueOptions {
    /// 排队等待超过该时长时输出告警（仅观测，不阻塞）
    pub warn_after: Duration,
}

impl EnqueueOptions {
    pub fn warn_after(warn_after: Duration) -> Self {
        Self { warn_after }
    }
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            warn_after: DEFAULT_WARN_AFTER,
        }
    }
}

/// Lane 当前状态快照
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LaneSnapshot {
    pub name: String,
    pub queued: usize,
    pub active: usize,
    pub max_concurrent: usize,
}

/// 任务结束后交付结果的闭包
type Settle = Box<dyn FnOnce() + Send>;

/// 类型擦除后的待执行任务
trait PendingTask: Send {
    /// 运行任务（含 panic 捕获），返回交付结果的闭包
    fn start(self: Box<Self>, lane: String) -> BoxFuture<'static, Settle>;

    /// 未开始即被丢弃
    fn reject(self: Box<Self>, err: LaneError);
}

struct Job<F, T> {
    task: F,
    tx: oneshot::Sender<Result<T, LaneError>>,
}

impl<F, T> PendingTask for Job<F, T>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    fn start(self: Box<Self>, lane: String) -> BoxFuture<'static, Settle> {
        let Job { task, tx } = *self;
        Box::pin(async move {
            let result = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(LaneError::Task(e)),
                Err(_) => Err(LaneError::Panicked { lane }),
            };
            Box::new(move || {
                let _ = tx.send(result);
            }) as Settle
        })
    }

    fn reject(self: Box<Self>, err: LaneError) {
        let _ = self.tx.send(Err(err));
    }
}

/// 队列条目：任务 + 入队时间 + 慢等待阈值
struct QueueEntry {
    task: Box<dyn PendingTask>,
    enqueued_at: Instant,
    warn_after: Duration,
}

/// 单条 Lane 的记账状态
struct LaneState {
    queue: VecDeque<QueueEntry>,
    active: usize,
    max_concurrent: usize,
    /// 单飞标记：同一时刻只有一个 drain 循环在出队
    draining: bool,
}

impl LaneState {
    fn new(max_concurrent: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            active: 0,
            max_concurrent,
            draining: false,
        }
    }
}

struct Inner {
    lanes: Mutex<HashMap<String, LaneState>>,
    /// 配置中预设的并发上限（Lane 首次出现时采用）
    presets: HashMap<String, usize>,
    default_warn_after: Duration,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, LaneState>> {
        // 记账代码内没有会 panic 的路径；万一中毒仍继续使用内部数据
        self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lane_entry<'a>(
        &self,
        lanes: &'a mut HashMap<String, LaneState>,
        lane: &str,
    ) -> &'a mut LaneState {
        lanes.entry(lane.to_string()).or_insert_with(|| {
            let max = self.presets.get(lane).copied().unwrap_or(1);
            LaneState::new(max.max(1))
        })
    }

    /// 出队循环：在容量与队列允许时持续启动任务
    fn drain(self: &Arc<Self>, lane: &str) {
        {
            let mut lanes = self.lock();
            let state = self.lane_entry(&mut lanes, lane);
            if state.draining {
                return;
            }
            state.draining = true;
        }

        loop {
            let next = {
                let mut lanes = self.lock();
                let state = self.lane_entry(&mut lanes, lane);
                if state.active < state.max_concurrent {
                    if let Some(entry) = state.queue.pop_front() {
                        state.active += 1;
                        Some((entry, state.queue.len()))
                    } else {
                        state.draining = false;
                        None
                    }
                } else {
                    state.draining = false;
                    None
                }
            };

            match next {
                Some((entry, queued_ahead)) => self.launch(lane, entry, queued_ahead),
                None => break,
            }
        }
    }

    fn launch(self: &Arc<Self>, lane: &str, entry: QueueEntry, queued_ahead: usize) {
        let waited = entry.enqueued_at.elapsed();
        if wait_exceeded(waited, entry.warn_after) {
            tracing::warn!(
                lane = %lane,
                waited_ms = waited.as_millis() as u64,
                queued_ahead,
                "lane wait exceeded"
            );
        }

        let inner = Arc::clone(self);
        let lane = lane.to_string();
        tokio::spawn(async move {
            let started = Instant::now();
            let settle = entry.task.start(lane.clone()).await;

            let (active, queued) = {
                let mut lanes = inner.lock();
                let state = inner.lane_entry(&mut lanes, &lane);
                state.active = state.active.saturating_sub(1);
                (state.active, state.queue.len())
            };
            tracing::debug!(
                lane = %lane,
                elapsed_ms = started.elapsed().as_millis() as u64,
                active,
                queued,
                "lane task done"
            );

            inner.drain(&lane);
            settle();
        });
    }
}

/// 分道调度器：按 Lane 名管理队列与并发上限；克隆后共享同一组 Lane
#[derive(Clone)]
pub struct LaneScheduler {
    inner: Arc<Inner>,
}

impl LaneScheduler {
    pub fn new() -> Self {
        Self::with_presets(HashMap::new(), DEFAULT_WARN_AFTER)
    }

    /// 按 [lanes] 配置创建：预设各 Lane 并发上限与默认告警阈值
    pub fn from_config(section: &LanesSection) -> Self {
        let presets = section
            .concurrency
            .iter()
            .map(|(lane, n)| (normalize_lane(lane).to_string(), (*n).max(1)))
            .collect();
        Self::with_presets(
            presets,
            Duration::from_millis(section.default_warn_after_ms),
        )
    }

    fn with_presets(presets: HashMap<String, usize>, default_warn_after: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                lanes: Mutex::new(HashMap::new()),
                presets,
                default_warn_after,
            }),
        }
    }

    /// 设置并发上限（至少为 1），并立即利用新增容量出队
    pub fn set_concurrency(&self, lane: impl AsRef<str>, max_concurrent: usize) {
        let lane = normalize_lane(lane.as_ref());
        {
            let mut lanes = self.inner.lock();
            let state = self.inner.lane_entry(&mut lanes, lane);
            state.max_concurrent = max_concurrent.max(1);
        }
        self.inner.drain(lane);
    }

    /// 以默认选项入队
    pub fn enqueue<F, T>(
        &self,
        lane: impl AsRef<str>,
        task: F,
    ) -> impl Future<Output = Result<T, LaneError>> + Send + 'static
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let opts = EnqueueOptions::warn_after(self.inner.default_warn_after);
        self.enqueue_with(lane, task, opts)
    }

    /// 入队到队尾并触发出队；必须在 Tokio 运行时内调用
    ///
    /// 入队是同步完成的：返回前 queue_size 已经计入该任务。
    /// 返回的 future 在任务结束时完成，任务自身的错误以 `LaneError::Task` 原样交回。
    pub fn enqueue_with<F, T>(
        &self,
        lane: impl AsRef<str>,
        task: F,
        opts: EnqueueOptions,
    ) -> impl Future<Output = Result<T, LaneError>> + Send + 'static
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let lane = normalize_lane(lane.as_ref()).to_string();
        let (tx, rx) = oneshot::channel();
        let entry = QueueEntry {
            task: Box::new(Job { task, tx }),
            enqueued_at: Instant::now(),
            warn_after: opts.warn_after,
        };

        let queued = {
            let mut lanes = self.inner.lock();
            let state = self.inner.lane_entry(&mut lanes, &lane);
            state.queue.push_back(entry);
            state.queue.len()
        };
        tracing::debug!(lane = %lane, queued, "lane enqueue");

        self.inner.drain(&lane);

        async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(LaneError::Dropped { lane }),
            }
        }
    }

    /// 排队中 + 运行中的任务数；未知 Lane 为 0
    pub fn queue_size(&self, lane: impl AsRef<str>) -> usize {
        let lane = normalize_lane(lane.as_ref());
        self.inner
            .lock()
            .get(lane)
            .map(|s| s.queue.len() + s.active)
            .unwrap_or(0)
    }

    /// 运行中的任务数
    pub fn active_count(&self, lane: impl AsRef<str>) -> usize {
        let lane = normalize_lane(lane.as_ref());
        self.inner.lock().get(lane).map(|s| s.active).unwrap_or(0)
    }

    /// 丢弃尚未开始的条目并以 Cleared 结束它们，返回丢弃数量；运行中的任务不受影响
    pub fn clear_lane(&self, lane: impl AsRef<str>) -> usize {
        let lane = normalize_lane(lane.as_ref());
        let dropped: Vec<QueueEntry> = {
            let mut lanes = self.inner.lock();
            match lanes.get_mut(lane) {
                Some(state) => state.queue.drain(..).collect(),
                None => return 0,
            }
        };

        let count = dropped.len();
        for entry in dropped {
            entry.task.reject(LaneError::Cleared {
                lane: lane.to_string(),
            });
        }
        if count > 0 {
            tracing::info!(lane = %lane, cleared = count, "lane cleared");
        }
        count
    }

    /// 所有已出现过的 Lane 的状态快照（按名称排序）
    pub fn lanes(&self) -> Vec<LaneSnapshot> {
        let mut snapshots: Vec<LaneSnapshot> = self
            .inner
            .lock()
            .iter()
            .map(|(name, s)| LaneSnapshot {
                name: name.clone(),
                queued: s.queue.len(),
                active: s.active,
                max_concurrent: s.max_concurrent,
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}

impl Default for LaneScheduler {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_lane(lane: &str) -> &str {
    let trimmed = lane.trim();
    if trimmed.is_empty() {
        DEFAULT_LANE
    } else {
        trimmed
    }
}

/// 等待时长严格超过阈值才告警
fn wait_exceeded(waited: Duration, warn_after: Duration) -> bool {
    waited > warn_after
}
