//! 站点协作方客户端
//!
//! 能力发现、策略评估、工作流建议与动作执行都经由该边界；
//! 全部按请求调用，失败由上层按「顾问失败不影响主回复」的约定吸收。

use async_trait::async_trait;
use thiserror::Error;

use crate::core::advisory::Suggestion;
use crate::memory::SiteContext;
use crate::site::{AbilityDescriptor, ActionOutcome, PendingAction};

/// 站点调用错误
#[derive(Error, Debug)]
pub enum SiteError {
    #[error("Site request failed: {0}")]
    Http(String),

    #[error("Site returned status {0}: {1}")]
    Status(u16, String),

    #[error("Site response decode failed: {0}")]
    Decode(String),
}

/// 站点协作方接口；测试注入 Mock 实现
#[async_trait]
pub trait SiteClient: Send + Sync {
    /// 能力发现；站点不支持（404）时返回 None
    async fn discover_abilities(
        &self,
        site_url: &str,
        token: &str,
    ) -> Result<Option<Vec<AbilityDescriptor>>, SiteError>;

    /// 策略评估
    async fn evaluate_policies(
        &self,
        site_url: &str,
        token: &str,
        context: &SiteContext,
    ) -> Result<Vec<Suggestion>, SiteError>;

    /// 工作流建议（接收用户输入与策略评估结果，见 DESIGN.md 的权威裁定）
    async fn suggest_workflows(
        &self,
        site_url: &str,
        token: &str,
        user_input: &str,
        policy_result: &[Suggestion],
    ) -> Result<Vec<Suggestion>, SiteError>;

    /// 执行（或干跑）一个已确认的动作
    async fn execute_action(
        &self,
        action: &PendingAction,
        token: &str,
    ) -> Result<ActionOutcome, SiteError>;
}

/// reqwest 实现：站点以 REST 形式暴露协作接口
pub struct HttpSiteClient {
    http: reqwest::Client,
}

impl HttpSiteClient {
    pub fn new(request_timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(request_timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    fn endpoint(site_url: &str, path: &str) -> String {
        format!("{}/wasp/v1/{}", site_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        token: &str,
        body: &B,
    ) -> Result<T, SiteError> {
        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| SiteError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SiteError::Status(status.as_u16(), text));
        }
        resp.json::<T>()
            .await
            .map_err(|e| SiteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl SiteClient for HttpSiteClient {
    async fn discover_abilities(
        &self,
        site_url: &str,
        token: &str,
    ) -> Result<Option<Vec<AbilityDescriptor>>, SiteError> {
        let url = Self::endpoint(site_url, "abilities");
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SiteError::Http(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 404 {
            // 站点未启用能力发现
            return Ok(None);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SiteError::Status(status.as_u16(), text));
        }
        let abilities = resp
            .json::<Vec<AbilityDescriptor>>()
            .await
            .map_err(|e| SiteError::Decode(e.to_string()))?;
        Ok(Some(abilities))
    }

    async fn evaluate_policies(
        &self,
        site_url: &str,
        token: &str,
        context: &SiteContext,
    ) -> Result<Vec<Suggestion>, SiteError> {
        let url = Self::endpoint(site_url, "policies/evaluate");
        self.post_json(&url, token, context).await
    }

    async fn suggest_workflows(
        &self,
        site_url: &str,
        token: &str,
        user_input: &str,
        policy_result: &[Suggestion],
    ) -> Result<Vec<Suggestion>, SiteError> {
        let url = Self::endpoint(site_url, "workflows/suggest");
        let body = serde_json::json!({
            "user_input": user_input,
            "policy_result": policy_result,
        });
        self.post_json(&url, token, &body).await
    }

    async fn execute_action(
        &self,
        action: &PendingAction,
        token: &str,
    ) -> Result<ActionOutcome, SiteError> {
        let url = Self::endpoint(&action.site_url, "actions/execute");
        self.post_json(&url, token, action).await
    }
}
