//! LLM 层：模型配置、后端抽象、多模型重试/降级运行器、Mock 后端

pub mod fallback;
pub mod mock;
pub mod model;

pub use fallback::{
    default_recoverable_patterns, run_with_model_fallback, FallbackCallback, FallbackContext,
    FallbackOptions, RetryCallback,
};
pub use mock::MockBackend;
pub use model::{ModelBackend, ModelConfig, ModelReply, ModelRequest};
