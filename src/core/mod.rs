//! 核心执行控制：错误类型、错误分类、分道任务调度

pub mod classifier;
pub mod error;
pub mod lane_scheduler;

pub use classifier::{classify, classify_message, ErrorKind};
pub use error::{FallbackError, LaneError, RegistryError};
pub use lane_scheduler::{
    EnqueueOptions, LaneKind, LaneScheduler, LaneSnapshot, DEFAULT_LANE, DEFAULT_WARN_AFTER,
};
