//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（纯文本）与
//! complete_with_tools（附带工具定义，允许返回结构化函数调用）。

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::memory::Message;

/// 发给 LLM 的工具定义（由站点能力转换而来）
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema 形式的参数定义
    pub parameters: Value,
}

/// 一次完成调用的结果：纯文本，或模型请求的函数调用
#[derive(Clone, Debug, PartialEq)]
pub enum LlmReply {
    Text(String),
    FunctionCall { name: String, arguments: Value },
}

/// LLM 调用错误，按「可重试 / 致命」分类
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Upstream quota or rate limit exhausted: {0}")]
    RateLimited(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("API error: {0}")]
    Api(String),
}

impl LlmError {
    /// 仅枚举内的瞬态错误允许重试；其余首次即致命
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited(_)
                | LlmError::Unavailable(_)
                | LlmError::Timeout
                | LlmError::Network(_)
        )
    }

    /// 兜底启发式：当上游只给出一段人类可读的错误消息时，按子串归类。
    /// 结构化信号（HTTP 状态、reqwest 错误种类）优先于此函数；
    /// 所有子串规则集中在这一处，便于单独测试。
    pub fn classify_message(message: &str) -> LlmError {
        let lower = message.to_lowercase();
        if lower.contains("rate limit")
            || lower.contains("quota")
            || lower.contains("too many requests")
            || lower.contains("429")
        {
            LlmError::RateLimited(message.to_string())
        } else if lower.contains("unavailable")
            || lower.contains("overloaded")
            || lower.contains("503")
        {
            LlmError::Unavailable(message.to_string())
        } else if lower.contains("timeout") || lower.contains("timed out") {
            LlmError::Timeout
        } else if lower.contains("connection")
            || lower.contains("network")
            || lower.contains("dns")
        {
            LlmError::Network(message.to_string())
        } else if lower.contains("api key")
            || lower.contains("api_key")
            || lower.contains("unauthorized")
            || lower.contains("authentication")
            || lower.contains("401")
        {
            LlmError::Auth(message.to_string())
        } else {
            LlmError::Api(message.to_string())
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 纯文本完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 附带工具定义的完成；模型可返回文本或函数调用
    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
