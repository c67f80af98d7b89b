//! 调度错误类型
//!
//! 与网关配合：每个变体对应一个 HTTP 状态码；校验与凭据错误不重试，
//! 瞬态类在弹性调用层重试耗尽后才会到达这里。解析失败永远不会成为
//! 错误，它在调度层就地降级为对话回复。

use thiserror::Error;

/// 请求调度过程中可能出现的错误
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid request: {0}")]
    Validation(String),

    /// caller_supplied 区分「你的凭据无效」与「共享凭据被拒」
    #[error("Credential rejected: {message}")]
    Credential {
        caller_supplied: bool,
        message: String,
    },

    /// 本地限流命中，附整分钟向上取整的重置提示
    #[error("Rate limit exceeded, retry after {retry_after_minutes} minute(s)")]
    RateLimited { retry_after_minutes: i64 },

    /// 上游额度耗尽（重试耗尽后浮出）
    #[error("Upstream quota exhausted: {0}")]
    UpstreamQuota(String),

    /// 网络失败（重试耗尽后浮出）
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Internal error: {0}")]
    Unknown(String),
}

impl DispatchError {
    /// 对应的 HTTP 状态码（网关层转换为 axum StatusCode）
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::Validation(_) => 400,
            DispatchError::Credential { .. } => 401,
            DispatchError::RateLimited { .. } => 429,
            DispatchError::UpstreamQuota(_) => 429,
            DispatchError::Network(_) => 503,
            DispatchError::Unknown(_) => 500,
        }
    }

    /// 给最终用户的说明文字（不泄露内部细节）
    pub fn user_message(&self) -> String {
        match self {
            DispatchError::Validation(msg) => format!("请求无效：{}", msg),
            DispatchError::Credential {
                caller_supplied: true,
                ..
            } => "你提供的 API Key 被上游拒绝，请检查后重试。(Your credential was rejected.)"
                .to_string(),
            DispatchError::Credential {
                caller_supplied: false,
                ..
            } => "共享服务凭据被上游拒绝，请稍后再试或在请求头提供你自己的 API Key。"
                .to_string(),
            DispatchError::RateLimited {
                retry_after_minutes,
            } => format!(
                "请求太频繁，请在约 {} 分钟后重试。",
                retry_after_minutes
            ),
            DispatchError::UpstreamQuota(_) => {
                "你的 API Key 额度已用尽，请稍后再试。(Quota exhausted.)".to_string()
            }
            DispatchError::Network(_) => {
                "上游服务暂时不可达，请稍后再试。(Service unreachable.)".to_string()
            }
            DispatchError::Unknown(_) => "内部错误，请稍后再试。".to_string(),
        }
    }
}
