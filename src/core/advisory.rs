//! 建议合并：把策略 / 工作流建议挂到会话回复上
//!
//! 建议是只读顾问数据，绝不可执行；只有主回复为对话型时才附加
//! （待确认动作上不附加，避免出现互相竞争的行动号召）。

use serde::{Deserialize, Serialize};

use crate::core::dispatch::DispatchResult;
use crate::site::RiskLevel;

/// 一条顾问建议（策略或工作流来源）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    /// 优先级 / 强度，越大越重要
    #[serde(default)]
    pub strength: u8,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step: Option<String>,
}

/// 将建议列表并入调度结果；仅对话型结果接收建议，
/// 两张列表按 id 去重（策略优先，工作流重复项被丢弃）。
pub fn merge_advisories(
    result: DispatchResult,
    policy: Vec<Suggestion>,
    workflow: Vec<Suggestion>,
) -> DispatchResult {
    match result {
        DispatchResult::Conversational {
            text,
            degraded,
            policy_context: _,
            workflow_context: _,
        } => {
            let mut seen: std::collections::HashSet<String> =
                policy.iter().map(|s| s.id.clone()).collect();
            let workflow: Vec<Suggestion> = workflow
                .into_iter()
                .filter(|s| seen.insert(s.id.clone()))
                .collect();
            DispatchResult::Conversational {
                text,
                degraded,
                policy_context: policy,
                workflow_context: workflow,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{ActionMode, PendingAction};

    fn suggestion(id: &str, desc: &str) -> Suggestion {
        Suggestion {
            id: id.to_string(),
            category: "maintenance".to_string(),
            risk: None,
            strength: 1,
            description: desc.to_string(),
            next_step: None,
        }
    }

    #[test]
    fn test_merge_onto_conversational_dedups_by_id() {
        let result = DispatchResult::conversational("好的，已为你检查站点状态。");
        let merged = merge_advisories(
            result,
            vec![suggestion("s1", "policy view"), suggestion("s2", "other")],
            vec![suggestion("s1", "workflow view"), suggestion("s3", "flow")],
        );
        match merged {
            DispatchResult::Conversational {
                policy_context,
                workflow_context,
                ..
            } => {
                assert_eq!(policy_context.len(), 2);
                // s1 已在策略列表中出现，工作流侧的重复项被去掉
                assert_eq!(workflow_context.len(), 1);
                assert_eq!(workflow_context[0].id, "s3");
            }
            _ => panic!("Expected Conversational"),
        }
    }

    #[test]
    fn test_suppressed_on_pending_confirmation() {
        let result = DispatchResult::PendingConfirmation {
            action: PendingAction {
                ability: "update_plugin".to_string(),
                arguments: serde_json::json!({"slug": "akismet"}),
                site_url: "https://example.com".to_string(),
                mode: ActionMode::Simulate,
            },
            explanation: "将更新插件 akismet".to_string(),
        };
        let merged = merge_advisories(result, vec![suggestion("s1", "x")], vec![]);
        match merged {
            DispatchResult::PendingConfirmation { .. } => {}
            _ => panic!("advisories must not change the result variant"),
        }
    }
}
