//! 短期记忆：对话历史窗口
//!
//! 保留最近 N 条消息（FIFO，最旧先淘汰），供 LLM 上下文与回复摘要使用。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// 单条消息（发往 LLM 的最小形态）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 会话内的一条历史记录：消息 + 绝对时间戳 + 会话内相对秒数
#[derive(Clone, Debug)]
pub struct ChatEntry {
    pub role: Role,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// 自会话开始经过的秒数
    pub session_time_secs: i64,
}

/// 有界对话窗口：超出容量时丢弃最旧的条目
#[derive(Clone, Debug)]
pub struct ChatWindow {
    entries: Vec<ChatEntry>,
    max_entries: usize,
}

impl ChatWindow {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
        }
    }

    pub fn push(&mut self, entry: ChatEntry) {
        self.entries.push(entry);
        self.prune();
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// 超出 max_entries 时丢弃最旧的条目，保留最近部分
    fn prune(&mut self) {
        if self.entries.len() > self.max_entries {
            let keep = self.max_entries;
            self.entries.drain(..self.entries.len() - keep);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 最近 n 条记录的纯文本摘要（"role: message" 每行一条），用于拼接上下文
    pub fn recent_summary(&self, n: usize) -> String {
        let start = self.entries.len().saturating_sub(n);
        self.entries[start..]
            .iter()
            .map(|e| format!("{}: {}", e.role, e.message))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: Role, msg: &str) -> ChatEntry {
        ChatEntry {
            role,
            message: msg.to_string(),
            timestamp: Utc::now(),
            session_time_secs: 0,
        }
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = ChatWindow::new(10);
        for i in 0..50 {
            window.push(entry(Role::User, &format!("msg {}", i)));
        }
        assert_eq!(window.len(), 10);
        // 最旧的被淘汰，保留最近 10 条
        assert_eq!(window.entries()[0].message, "msg 40");
        assert_eq!(window.entries()[9].message, "msg 49");
    }

    #[test]
    fn test_recent_summary_order() {
        let mut window = ChatWindow::new(10);
        window.push(entry(Role::User, "你好"));
        window.push(entry(Role::Assistant, "你好，有什么可以帮你？"));
        let summary = window.recent_summary(2);
        assert!(summary.starts_with("user: 你好"));
        assert!(summary.contains("assistant:"));
    }
}
