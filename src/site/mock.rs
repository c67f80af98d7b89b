//! Mock 站点客户端（用于测试，无需远程站点）
//!
//! 各端点带独立调用计数，便于断言「无状态模式不触达任何协作方」等场景。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::advisory::Suggestion;
use crate::memory::SiteContext;
use crate::site::{
    AbilityDescriptor, ActionOutcome, PendingAction, SiteClient, SiteError,
};

/// Mock 站点：预置能力 / 建议 / 动作结果
#[derive(Default)]
pub struct MockSiteClient {
    pub abilities: Option<Vec<AbilityDescriptor>>,
    pub policies: Vec<Suggestion>,
    pub workflows: Vec<Suggestion>,
    pub action_outcome: Mutex<Option<ActionOutcome>>,
    pub discover_calls: AtomicU64,
    pub policy_calls: AtomicU64,
    pub workflow_calls: AtomicU64,
    pub execute_calls: AtomicU64,
}

impl MockSiteClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_abilities(mut self, abilities: Vec<AbilityDescriptor>) -> Self {
        self.abilities = Some(abilities);
        self
    }

    pub fn with_action_outcome(self, outcome: ActionOutcome) -> Self {
        *self.action_outcome.lock().unwrap() = Some(outcome);
        self
    }

    pub fn total_calls(&self) -> u64 {
        self.discover_calls.load(Ordering::SeqCst)
            + self.policy_calls.load(Ordering::SeqCst)
            + self.workflow_calls.load(Ordering::SeqCst)
            + self.execute_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SiteClient for MockSiteClient {
    async fn discover_abilities(
        &self,
        _site_url: &str,
        _token: &str,
    ) -> Result<Option<Vec<AbilityDescriptor>>, SiteError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.abilities.clone())
    }

    async fn evaluate_policies(
        &self,
        _site_url: &str,
        _token: &str,
        _context: &SiteContext,
    ) -> Result<Vec<Suggestion>, SiteError> {
        self.policy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.policies.clone())
    }

    async fn suggest_workflows(
        &self,
        _site_url: &str,
        _token: &str,
        _user_input: &str,
        _policy_result: &[Suggestion],
    ) -> Result<Vec<Suggestion>, SiteError> {
        self.workflow_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.workflows.clone())
    }

    async fn execute_action(
        &self,
        _action: &PendingAction,
        _token: &str,
    ) -> Result<ActionOutcome, SiteError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .action_outcome
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(ActionOutcome {
                success: true,
                message: Some("ok".to_string()),
                response: None,
            }))
    }
}
