//! LLM 层：客户端抽象、弹性重试与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage};
pub use retry::{call_with_retry, RetryPolicy, Sleeper, TokioSleeper};
pub use traits::{LlmClient, LlmError, LlmReply, ToolSpec};
