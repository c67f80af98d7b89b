//! 网关消息协议定义
//!
//! /ask 与 /confirm 的请求/响应形态。调度结果与调度错误在这里被
//! 穷尽匹配地序列化为响应信封，任何消费方都无法漏掉某个变体。

use serde::{Deserialize, Serialize};

use crate::core::{DispatchError, DispatchResult, Suggestion};
use crate::memory::SiteContext;
use crate::site::PendingAction;

/// POST /ask 请求体
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub prompt: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub site_context: Option<SiteContext>,
    /// 调用方携带的历史（≤10 条），仅用于播种新会话
    #[serde(default)]
    pub chat_history: Option<Vec<HistoryEntryIn>>,
}

/// 调用方提供的单条历史
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntryIn {
    pub role: String,
    pub message: String,
}

/// 限流信息（响应附带）
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// RFC 3339 时间戳
    pub reset_at: String,
}

/// 响应信封中的 reply 部分（历史兼容的字段布局）
#[derive(Debug, Clone, Serialize)]
pub struct ReplyEnvelope {
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_safe: Option<bool>,
    pub is_conversational: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call_pending: Option<PendingAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_context: Option<Vec<Suggestion>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_context: Option<Vec<Suggestion>>,
}

/// POST /ask 响应体
#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub status: &'static str,
    pub reply: ReplyEnvelope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
}

impl ReplyEnvelope {
    /// 成功结果 -> 信封（穷尽匹配所有变体）
    pub fn from_result(result: DispatchResult) -> Self {
        match result {
            DispatchResult::Conversational {
                text,
                degraded: _,
                policy_context,
                workflow_context,
            } => ReplyEnvelope {
                explanation: text,
                command: None,
                is_safe: None,
                is_conversational: true,
                function_call_pending: None,
                policy_context: if policy_context.is_empty() {
                    None
                } else {
                    Some(policy_context)
                },
                workflow_context: if workflow_context.is_empty() {
                    None
                } else {
                    Some(workflow_context)
                },
            },
            DispatchResult::StructuredCommand {
                command,
                parameters,
                explanation,
                is_safe,
            } => ReplyEnvelope {
                explanation,
                command: Some(serde_json::json!({
                    "command": command,
                    "parameters": parameters,
                })),
                is_safe,
                is_conversational: false,
                function_call_pending: None,
                policy_context: None,
                workflow_context: None,
            },
            DispatchResult::PendingConfirmation {
                action,
                explanation,
            } => ReplyEnvelope {
                explanation,
                command: None,
                is_safe: None,
                is_conversational: false,
                function_call_pending: Some(action),
                policy_context: None,
                workflow_context: None,
            },
        }
    }

    /// 调度错误 -> 信封（用户可读文案，不含内部细节）
    pub fn from_error(err: &DispatchError) -> Self {
        ReplyEnvelope {
            explanation: err.user_message(),
            command: None,
            is_safe: None,
            is_conversational: true,
            function_call_pending: None,
            policy_context: None,
            workflow_context: None,
        }
    }
}

/// POST /confirm 请求体：待确认动作 + 可选会话
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    #[serde(flatten)]
    pub action: PendingAction,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// POST /confirm 响应体
#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub status: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    /// 自愈模块生成的恢复建议（命中失败迹象时）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery: Option<String>,
}

/// POST /session/clear 请求体
#[derive(Debug, Deserialize)]
pub struct ClearSessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}
