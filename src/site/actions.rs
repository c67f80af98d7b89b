//! 远程动作：待确认动作与执行结果
//!
//! PendingAction 只在用户显式确认后才会被执行；simulate 模式报告预期效果
//! 而不改动远程状态。

use serde::{Deserialize, Serialize};

/// 执行模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionMode {
    /// 干跑：只报告预期效果
    Simulate,
    /// 真正执行
    Execute,
}

/// 待用户确认的远程动作
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingAction {
    pub ability: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    pub site_url: String,
    pub mode: ActionMode,
}

/// 远程动作的执行结果；message/response 可能携带站点侧的失败迹象，
/// 由自愈模块检测
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}
