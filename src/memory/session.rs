//! 会话记忆：对话窗口 + 已执行动作窗口 + 站点上下文
//!
//! 生命周期仅限进程内：会话开始时创建，每轮对话与每次远程动作尝试都会写入，
//! 用户显式清空时重置（站点仍连接则重新播种站点上下文）。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::conversation::{ChatEntry, ChatWindow, Role};

/// 当前连接站点的摘要信息（由调用方随请求提供）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteContext {
    pub site_url: String,
    #[serde(default)]
    pub site_name: Option<String>,
    /// 站点侧自述（版本、激活插件数等自由文本）
    #[serde(default)]
    pub summary: Option<String>,
}

/// 一次远程动作的执行记录
#[derive(Clone, Debug)]
pub struct ExecutedAction {
    pub action_type: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// 单个会话的记忆：有界对话历史、有界动作历史、站点上下文
pub struct SessionMemory {
    pub chat: ChatWindow,
    executed_actions: Vec<ExecutedAction>,
    max_actions: usize,
    pub site_context: Option<SiteContext>,
    pub started_at: DateTime<Utc>,
    /// 最后活跃时间，供过期清理使用
    pub last_active: DateTime<Utc>,
}

impl SessionMemory {
    pub fn new(max_chat_entries: usize, max_actions: usize) -> Self {
        let now = Utc::now();
        Self {
            chat: ChatWindow::new(max_chat_entries),
            executed_actions: Vec::new(),
            max_actions,
            site_context: None,
            started_at: now,
            last_active: now,
        }
    }

    /// 记录一轮中的单条消息（user 或 assistant）
    pub fn record(&mut self, role: Role, message: impl Into<String>) {
        let now = Utc::now();
        self.chat.push(ChatEntry {
            role,
            message: message.into(),
            timestamp: now,
            session_time_secs: (now - self.started_at).num_seconds(),
        });
        self.last_active = now;
    }

    /// 记录一次远程动作尝试（无论成败）
    pub fn record_action(
        &mut self,
        action_type: impl Into<String>,
        description: impl Into<String>,
        success: bool,
    ) {
        let now = Utc::now();
        self.executed_actions.push(ExecutedAction {
            action_type: action_type.into(),
            description: description.into(),
            timestamp: now,
            success,
        });
        if self.executed_actions.len() > self.max_actions {
            let keep = self.max_actions;
            let len = self.executed_actions.len();
            self.executed_actions.drain(..len - keep);
        }
        self.last_active = now;
    }

    pub fn executed_actions(&self) -> &[ExecutedAction] {
        &self.executed_actions
    }

    /// 显式清空：丢弃两个窗口并重置会话起点；站点仍连接时重新播种站点上下文
    pub fn clear(&mut self) {
        let site = self.site_context.take();
        self.chat.clear();
        self.executed_actions.clear();
        self.started_at = Utc::now();
        self.last_active = self.started_at;
        self.site_context = site;
    }

    pub fn is_expired(&self, idle_timeout: Duration) -> bool {
        Utc::now() - self.last_active > idle_timeout
    }
}

/// 会话存储：session_id -> SessionMemory，进程内、按空闲超时清理
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionMemory>>,
    max_chat_entries: usize,
    max_actions: usize,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(max_chat_entries: usize, max_actions: usize, idle_timeout_secs: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_chat_entries,
            max_actions,
            idle_timeout: Duration::seconds(idle_timeout_secs),
        }
    }

    /// 在指定会话上执行闭包，不存在则先创建
    pub async fn with_session<F, R>(&self, session_id: &str, f: F) -> R
    where
        F: FnOnce(&mut SessionMemory) -> R,
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionMemory::new(self.max_chat_entries, self.max_actions));
        f(session)
    }

    /// 取出会话（不存在则创建），释放锁以便持有期间安全地调用 LLM；
    /// 处理完必须用 put 放回
    pub async fn take(&self, session_id: &str) -> SessionMemory {
        let mut sessions = self.sessions.write().await;
        sessions
            .remove(session_id)
            .unwrap_or_else(|| SessionMemory::new(self.max_chat_entries, self.max_actions))
    }

    /// 放回取出的会话
    pub async fn put(&self, session_id: &str, memory: SessionMemory) {
        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), memory);
    }

    /// 清空指定会话（保留站点上下文播种语义见 SessionMemory::clear）
    pub async fn clear(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(s) => {
                s.clear();
                true
            }
            None => false,
        }
    }

    /// 清理过期会话，返回清理数量
    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.is_expired(self.idle_timeout))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired.len()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// 供 main 与测试共享的构造助手
pub fn create_session_store(
    max_chat_entries: usize,
    max_actions: usize,
    idle_timeout_secs: i64,
) -> Arc<SessionStore> {
    Arc::new(SessionStore::new(
        max_chat_entries,
        max_actions,
        idle_timeout_secs,
    ))
}
