//! 自愈环：远程动作失败后的自动诊断
//!
//! 命中失败迹象（显式失败状态，或响应/消息中的失败短语，中英双语、
//! 大小写不敏感）时，仅引用失败命令与其消息合成一条孤立的诊断提示，
//! 经弹性调用请求一次修复建议。该问答对绝不写入会话记忆，避免污染
//! 后续上下文。诊断调用自身失败时返回固定的「暂无恢复建议」文案。

use std::sync::Arc;

use crate::llm::{call_with_retry, LlmClient, LlmError, RetryPolicy, Sleeper};
use crate::memory::Message;
use crate::site::ActionOutcome;

/// 内置失败短语（中英双语），配置可追加
const FAILURE_PHRASES: &[&str] = &[
    "error",
    "failed",
    "failure",
    "permission denied",
    "not allowed",
    "unauthorized",
    "forbidden",
    "出错",
    "失败",
    "无权限",
    "权限不足",
    "被拒绝",
    "不允许",
];

/// 恢复建议前缀，网关与前端据此识别自愈消息
pub const RECOVERY_LABEL: &str = "[自动恢复建议 / Recovery suggestion]";

/// 诊断调用失败时的固定文案
const RECOVERY_UNAVAILABLE: &str =
    "[自动恢复建议 / Recovery suggestion] 暂时无法生成恢复建议，请检查站点日志或稍后重试。";

/// 命中的失败迹象
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureSignature {
    /// 显式失败状态
    ErrorStatus,
    /// 响应或消息中命中的短语
    Phrase(String),
}

/// 失败迹象检测；所有短语匹配集中在此一处
pub fn detect_failure(outcome: &ActionOutcome, extra_phrases: &[String]) -> Option<FailureSignature> {
    if !outcome.success {
        return Some(FailureSignature::ErrorStatus);
    }

    let mut haystack = String::new();
    if let Some(msg) = &outcome.message {
        haystack.push_str(msg);
        haystack.push('\n');
    }
    if let Some(resp) = &outcome.response {
        haystack.push_str(&resp.to_string());
    }
    let haystack = haystack.to_lowercase();

    FAILURE_PHRASES
        .iter()
        .copied()
        .chain(extra_phrases.iter().map(|s| s.as_str()))
        .find(|phrase| haystack.contains(&phrase.to_lowercase()))
        .map(|phrase| FailureSignature::Phrase(phrase.to_string()))
}

/// 自愈器：隔离的诊断调用，不持有也不触碰会话记忆
pub struct AutoHealer {
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    extra_phrases: Vec<String>,
}

impl AutoHealer {
    pub fn new(retry: RetryPolicy, sleeper: Arc<dyn Sleeper>, extra_phrases: Vec<String>) -> Self {
        Self {
            retry,
            sleeper,
            extra_phrases,
        }
    }

    /// 检测动作结果中的失败迹象
    pub fn detect(&self, outcome: &ActionOutcome) -> Option<FailureSignature> {
        detect_failure(outcome, &self.extra_phrases)
    }

    /// 针对失败的命令生成恢复建议；孤立提示，只含命令与失败消息
    pub async fn heal(
        &self,
        llm: &dyn LlmClient,
        command: &str,
        failure_message: &str,
    ) -> String {
        let messages = vec![
            Message::system(
                "你是站点运维诊断助手。下面是一条刚刚执行失败的站点命令及其错误信息。\
                 请用一两句话给出最可能的原因和一个具体的下一步建议。不要执行任何操作。",
            ),
            Message::user(format!(
                "命令: {}\n错误信息: {}",
                command, failure_message
            )),
        ];

        let result: Result<String, LlmError> =
            call_with_retry(&self.retry, self.sleeper.as_ref(), || {
                let messages = messages.clone();
                async move { llm.complete(&messages).await }
            })
            .await;

        match result {
            Ok(suggestion) => format!("{} {}", RECOVERY_LABEL, suggestion.trim()),
            Err(e) => {
                tracing::warn!(error = %e, "auto-heal diagnostic call failed");
                RECOVERY_UNAVAILABLE.to_string()
            }
        }
    }
}
