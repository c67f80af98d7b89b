//! 核心编排层：限流、调度决策、降级应答、建议合并、自愈、错误类型

pub mod advisory;
pub mod dispatch;
pub mod error;
pub mod fallback;
pub mod healing;
pub mod ratelimit;

pub use advisory::{merge_advisories, Suggestion};
pub use dispatch::{
    AskContext, CommandEnvelope, DispatchResult, Dispatcher, command_envelope_schema_json,
};
pub use error::DispatchError;
pub use fallback::FallbackCause;
pub use healing::{detect_failure, AutoHealer, FailureSignature, RECOVERY_LABEL};
pub use ratelimit::{
    MemoryRateLimitStore, RateLimitDecision, RateLimitRecord, RateLimitStore, RateLimiter,
};
