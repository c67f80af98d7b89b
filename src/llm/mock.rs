//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本顺序弹出预置回复；脚本耗尽后回显用户最后一条消息。
//! 附带调用计数，便于断言重试次数与「无调用」场景。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, LlmReply, ToolSpec};
use crate::memory::{Message, Role};

/// Mock 客户端：预置回复队列 + 调用计数
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<LlmReply, LlmError>>>,
    calls: AtomicU64,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置回复序列，每次调用按序弹出
    pub fn with_replies(replies: Vec<Result<LlmReply, LlmError>>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            calls: AtomicU64::new(0),
        }
    }

    /// 预置单条文本回复
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::with_replies(vec![Ok(LlmReply::Text(text.into()))])
    }

    /// 累计调用次数
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_reply(&self, messages: &[Message]) -> Result<LlmReply, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reply) = self.script.lock().unwrap().pop_front() {
            return reply;
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(LlmReply::Text(format!("Echo from Mock: {}", last_user)))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        match self.next_reply(messages)? {
            LlmReply::Text(t) => Ok(t),
            LlmReply::FunctionCall { name, arguments } => {
                // 纯文本接口上把函数调用脚本序列化为 JSON 文本
                Ok(serde_json::json!({ "tool": name, "args": arguments }).to_string())
            }
        }
    }

    async fn complete_with_tools(
        &self,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> Result<LlmReply, LlmError> {
        self.next_reply(messages)
    }
}
