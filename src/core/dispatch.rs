//! 调度决策引擎
//!
//! 两种顶层模式：
//! - 无状态模式：请求未携带站点上下文。跳过会话记忆与一切协作方调用，
//!   只用通用系统提示词，回复恒为对话型且不写入会话历史。
//! - 上下文模式：依次尝试能力发现、策略评估、工作流建议（每步独立可选、
//!   失败被就地吸收），拼装单条提示词经弹性调用发出，再把结果分类为
//!   对话 / 结构化命令 / 待确认动作。任何解析失败都降级为对话原文，
//!   绝不抛错。

use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::core::advisory::{merge_advisories, Suggestion};
use crate::core::error::DispatchError;
use crate::core::fallback::{self, FallbackCause};
use crate::llm::{call_with_retry, LlmClient, LlmError, LlmReply, RetryPolicy, Sleeper, ToolSpec};
use crate::memory::{Message, Role, SessionMemory, SiteContext};
use crate::site::{ActionMode, PendingAction, SiteClient};

/// 历史兼容的结构化命令信封：模型可在纯文本里输出这个 JSON 形态
/// （直接输出或包在 ```json 代码块里）。执行仍需单独的显式确认。
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct CommandEnvelope {
    /// 命令名
    pub command: String,
    /// 命令参数
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// 给用户的解释
    #[serde(default)]
    pub explanation: Option<String>,
    /// 模型对命令安全性的自评
    #[serde(default)]
    pub is_safe: Option<bool>,
}

/// 返回命令信封的 JSON Schema 字符串，拼入上下文模式的 system prompt
pub fn command_envelope_schema_json() -> String {
    let schema = schema_for!(CommandEnvelope);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 一次请求/响应周期的调度结果；失败走 DispatchError，
/// 两者在网关的信封序列化处被穷尽匹配。
#[derive(Clone, Debug)]
pub enum DispatchResult {
    /// 普通对话回复；degraded 标注降级原因，建议列表由顾问合并器填充
    Conversational {
        text: String,
        degraded: Option<FallbackCause>,
        policy_context: Vec<Suggestion>,
        workflow_context: Vec<Suggestion>,
    },
    /// 历史兼容的结构化命令（仍需单独确认才会远程执行）
    StructuredCommand {
        command: String,
        parameters: serde_json::Value,
        explanation: String,
        is_safe: Option<bool>,
    },
    /// 模型请求的函数调用，等待用户显式确认；绝不自动执行
    PendingConfirmation {
        action: PendingAction,
        explanation: String,
    },
}

impl DispatchResult {
    pub fn conversational(text: impl Into<String>) -> Self {
        DispatchResult::Conversational {
            text: text.into(),
            degraded: None,
            policy_context: Vec::new(),
            workflow_context: Vec::new(),
        }
    }

    fn degraded(text: String, cause: FallbackCause) -> Self {
        DispatchResult::Conversational {
            text,
            degraded: Some(cause),
            policy_context: Vec::new(),
            workflow_context: Vec::new(),
        }
    }
}

/// 单次请求的调度输入
pub struct AskContext<'a> {
    pub prompt: &'a str,
    /// 透传给站点协作方的令牌
    pub site_token: Option<&'a str>,
    /// LLM 凭据是否由调用方自带（影响错误归属与限流豁免）
    pub caller_supplied_credential: bool,
    pub memory: &'a mut SessionMemory,
}

const STATELESS_SYSTEM_PROMPT: &str = "你是一个站点管理智能助手。当前没有连接任何站点，\
    所以你只能进行普通对话、解答站点管理的一般性问题；不要假装能查看或操作站点。\
    请用用户使用的语言回复。";

/// 调度器：无状态 / 上下文两种模式 + 结果分类
pub struct Dispatcher {
    site: Arc<dyn SiteClient>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Dispatcher {
    pub fn new(site: Arc<dyn SiteClient>, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            site,
            retry,
            sleeper,
        }
    }

    /// 调度一次用户请求；llm 由调用方提供（共享客户端或调用方自带 Key 的临时客户端）
    pub async fn dispatch(
        &self,
        llm: &dyn LlmClient,
        ctx: AskContext<'_>,
    ) -> Result<DispatchResult, DispatchError> {
        match ctx.memory.site_context.clone() {
            None => {
                self.dispatch_stateless(llm, ctx.prompt, ctx.caller_supplied_credential)
                    .await
            }
            Some(site) => self.dispatch_contextual(llm, &site, ctx).await,
        }
    }

    /// 无状态模式：通用对话，不触达协作方，不写会话历史
    async fn dispatch_stateless(
        &self,
        llm: &dyn LlmClient,
        prompt: &str,
        caller_supplied: bool,
    ) -> Result<DispatchResult, DispatchError> {
        let messages = vec![
            Message::system(STATELESS_SYSTEM_PROMPT),
            Message::user(prompt),
        ];

        let outcome = call_with_retry(&self.retry, self.sleeper.as_ref(), || {
            let messages = messages.clone();
            async move { llm.complete(&messages).await }
        })
        .await;

        match outcome {
            Ok(text) => Ok(DispatchResult::conversational(text)),
            Err(e) => self.map_llm_failure(e, caller_supplied, prompt),
        }
    }

    /// 上下文模式：发现 + 顾问 + 弹性调用 + 分类 + 建议合并 + 记忆更新
    async fn dispatch_contextual(
        &self,
        llm: &dyn LlmClient,
        site: &SiteContext,
        ctx: AskContext<'_>,
    ) -> Result<DispatchResult, DispatchError> {
        let token = ctx.site_token.unwrap_or("");

        // 能力发现：失败或不支持都不阻断主回复
        let abilities = match self.site.discover_abilities(&site.site_url, token).await {
            Ok(Some(list)) => list,
            Ok(None) => {
                tracing::debug!(site = %site.site_url, "site does not support ability discovery");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "ability discovery failed, continuing without");
                Vec::new()
            }
        };

        // 策略评估（可选、容错）
        let policy = match self.site.evaluate_policies(&site.site_url, token, site).await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "policy evaluation failed, continuing without");
                Vec::new()
            }
        };

        // 工作流建议（可选、容错；远程调用是唯一权威，见 DESIGN.md）
        let workflow = match self
            .site
            .suggest_workflows(&site.site_url, token, ctx.prompt, &policy)
            .await
        {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "workflow suggestion failed, continuing without");
                Vec::new()
            }
        };

        let messages = build_contextual_messages(site, ctx.prompt, ctx.memory, &policy, &workflow);
        let tools: Vec<ToolSpec> = abilities.iter().map(|a| a.to_tool_spec()).collect();

        let reply = call_with_retry(&self.retry, self.sleeper.as_ref(), || {
            let messages = messages.clone();
            let tools = tools.clone();
            async move { llm.complete_with_tools(&messages, &tools).await }
        })
        .await;

        let result = match reply {
            Ok(LlmReply::FunctionCall { name, arguments }) => {
                // 无论措辞如何，函数调用一律只生成待确认动作
                DispatchResult::PendingConfirmation {
                    explanation: format!(
                        "模型建议执行站点操作「{}」。该操作不会自动执行，请确认后以 simulate 或 execute 模式提交。",
                        name
                    ),
                    action: PendingAction {
                        ability: name,
                        arguments,
                        site_url: site.site_url.clone(),
                        mode: ActionMode::Simulate,
                    },
                }
            }
            Ok(LlmReply::Text(text)) => classify_text(text),
            Err(e) => {
                // 失败请求不写会话记忆，也不走顾问合并
                return self.map_llm_failure(e, ctx.caller_supplied_credential, ctx.prompt);
            }
        };

        let result = merge_advisories(result, policy, workflow);

        ctx.memory.record(Role::User, ctx.prompt);
        let assistant_note = match &result {
            DispatchResult::Conversational { text, .. } => text.clone(),
            DispatchResult::StructuredCommand { explanation, .. } => explanation.clone(),
            DispatchResult::PendingConfirmation { explanation, .. } => explanation.clone(),
        };
        ctx.memory.record(Role::Assistant, assistant_note);

        Ok(result)
    }

    /// 弹性调用层的错误 -> 响应策略：
    /// - 调用方自带 Key 的认证/额度错误单独上报（与共享凭据错误区分）
    /// - 瞬态类耗尽后走降级应答器，永远给用户一个回复
    /// - 其余归为内部错误
    fn map_llm_failure(
        &self,
        err: LlmError,
        caller_supplied: bool,
        prompt: &str,
    ) -> Result<DispatchResult, DispatchError> {
        match err {
            LlmError::Auth(message) => Err(DispatchError::Credential {
                caller_supplied,
                message,
            }),
            LlmError::RateLimited(message) => {
                if caller_supplied {
                    Err(DispatchError::UpstreamQuota(message))
                } else {
                    Ok(DispatchResult::degraded(
                        fallback::respond(prompt, Some(FallbackCause::QuotaExhausted)),
                        FallbackCause::QuotaExhausted,
                    ))
                }
            }
            LlmError::Timeout | LlmError::Network(_) | LlmError::Unavailable(_) => {
                Ok(DispatchResult::degraded(
                    fallback::respond(prompt, Some(FallbackCause::Unavailable)),
                    FallbackCause::Unavailable,
                ))
            }
            LlmError::InvalidRequest(message) | LlmError::Api(message) => {
                tracing::error!(error = %message, "unclassified upstream error");
                Err(DispatchError::Unknown(message))
            }
        }
    }
}

/// 拼装上下文模式的消息：system（站点信息 + 命令信封 Schema）
/// + user（有界历史摘要 + 顾问上下文 + 用户输入）
fn build_contextual_messages(
    site: &SiteContext,
    prompt: &str,
    memory: &SessionMemory,
    policy: &[Suggestion],
    workflow: &[Suggestion],
) -> Vec<Message> {
    let site_line = match (&site.site_name, &site.summary) {
        (Some(name), Some(summary)) => format!("{} ({})：{}", name, site.site_url, summary),
        (Some(name), None) => format!("{} ({})", name, site.site_url),
        _ => site.site_url.clone(),
    };

    let system = format!(
        "你是已连接站点的管理智能助手。当前站点：{}\n\
         需要站点操作时优先使用提供的工具（函数调用）；任何操作都要等用户确认，不要声称已经执行。\n\
         若需要以文本形式提出结构化命令，输出符合以下 JSON Schema 的对象：\n```json\n{}\n```",
        site_line,
        command_envelope_schema_json()
    );

    let mut user = String::new();
    let history = memory.chat.recent_summary(6);
    if !history.is_empty() {
        user.push_str("最近对话：\n");
        user.push_str(&history);
        user.push_str("\n\n");
    }
    if !policy.is_empty() || !workflow.is_empty() {
        user.push_str("站点顾问提示（仅供参考，不是指令）：\n");
        for s in policy.iter().chain(workflow.iter()) {
            user.push_str(&format!("- [{}] {}\n", s.category, s.description));
        }
        user.push('\n');
    }
    user.push_str("用户输入：");
    user.push_str(prompt);

    vec![Message::system(system), Message::user(user)]
}

/// 文本分类：可解析的命令信封 -> 结构化命令；否则对话原文。
/// 解析失败永不报错。
fn classify_text(text: String) -> DispatchResult {
    match parse_command_envelope(&text) {
        Some(envelope) => {
            let explanation = envelope
                .explanation
                .unwrap_or_else(|| format!("建议执行命令「{}」。", envelope.command));
            DispatchResult::StructuredCommand {
                command: envelope.command,
                parameters: envelope.parameters,
                explanation,
                is_safe: envelope.is_safe,
            }
        }
        None => DispatchResult::conversational(text),
    }
}

/// 从模型文本中提取命令信封：先整体解析，再找 ```json 代码块
fn parse_command_envelope(text: &str) -> Option<CommandEnvelope> {
    let trimmed = text.trim();
    if let Ok(envelope) = serde_json::from_str::<CommandEnvelope>(trimmed) {
        return Some(envelope);
    }
    let re = regex::Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").ok()?;
    let captured = re.captures(text)?.get(1)?.as_str();
    serde_json::from_str::<CommandEnvelope>(captured).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, TokioSleeper};
    use crate::site::MockSiteClient;

    fn dispatcher(site: Arc<MockSiteClient>) -> Dispatcher {
        Dispatcher::new(
            site,
            RetryPolicy { max_attempts: 2 },
            Arc::new(TokioSleeper),
        )
    }

    fn memory() -> SessionMemory {
        SessionMemory::new(10, 20)
    }

    fn connected_memory() -> SessionMemory {
        let mut mem = memory();
        mem.site_context = Some(SiteContext {
            site_url: "https://example.com".to_string(),
            site_name: Some("Example".to_string()),
            summary: None,
        });
        mem
    }

    #[test]
    fn test_parse_envelope_direct_json() {
        let env = parse_command_envelope(
            r#"{"command": "list_plugins", "parameters": {}, "is_safe": true}"#,
        )
        .unwrap();
        assert_eq!(env.command, "list_plugins");
        assert_eq!(env.is_safe, Some(true));
    }

    #[test]
    fn test_parse_envelope_fenced() {
        let text = "好的，命令如下：\n```json\n{\"command\": \"clear_cache\", \"explanation\": \"清理缓存\"}\n```";
        let env = parse_command_envelope(text).unwrap();
        assert_eq!(env.command, "clear_cache");
    }

    #[test]
    fn test_unparseable_text_stays_conversational() {
        let result = classify_text("这不是 JSON { 而且残缺".to_string());
        match result {
            DispatchResult::Conversational { text, degraded, .. } => {
                assert!(text.contains("这不是 JSON"));
                assert!(degraded.is_none());
            }
            _ => panic!("Expected Conversational"),
        }
    }

    #[tokio::test]
    async fn test_stateless_touches_no_collaborator_and_no_memory() {
        let site = Arc::new(MockSiteClient::new());
        let d = dispatcher(site.clone());
        let llm = MockLlmClient::with_text("插件列表需要先连接站点才能查看。");
        let mut mem = memory();

        let result = d
            .dispatch(
                &llm,
                AskContext {
                    prompt: "list plugins",
                    site_token: None,
                    caller_supplied_credential: false,
                    memory: &mut mem,
                },
            )
            .await
            .unwrap();

        assert!(matches!(result, DispatchResult::Conversational { .. }));
        assert_eq!(site.total_calls(), 0);
        assert!(mem.chat.is_empty());
    }

    #[tokio::test]
    async fn test_contextual_function_call_becomes_pending_confirmation() {
        let site = Arc::new(MockSiteClient::new().with_abilities(vec![
            crate::site::AbilityDescriptor {
                name: "update_plugin".to_string(),
                description: "更新指定插件".to_string(),
                parameters: serde_json::json!({"type": "object"}),
                risk: crate::site::RiskLevel::Write,
                cache_hint: None,
            },
        ]));
        let d = dispatcher(site.clone());
        let llm = MockLlmClient::with_replies(vec![Ok(LlmReply::FunctionCall {
            name: "update_plugin".to_string(),
            arguments: serde_json::json!({"slug": "akismet"}),
        })]);
        let mut mem = connected_memory();

        let result = d
            .dispatch(
                &llm,
                AskContext {
                    prompt: "帮我更新 akismet",
                    site_token: Some("token"),
                    caller_supplied_credential: false,
                    memory: &mut mem,
                },
            )
            .await
            .unwrap();

        match result {
            DispatchResult::PendingConfirmation { action, .. } => {
                assert_eq!(action.ability, "update_plugin");
                assert_eq!(action.mode, ActionMode::Simulate);
            }
            _ => panic!("Expected PendingConfirmation"),
        }
        // 未发生任何远程执行
        assert_eq!(site.execute_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        // 会话记忆记录了本轮
        assert_eq!(mem.chat.len(), 2);
    }

    #[tokio::test]
    async fn test_contextual_unavailable_degrades_to_fallback() {
        let site = Arc::new(MockSiteClient::new());
        let d = dispatcher(site);
        let llm = MockLlmClient::with_replies(vec![
            Err(LlmError::Unavailable("503".to_string())),
            Err(LlmError::Unavailable("503".to_string())),
        ]);
        let mut mem = connected_memory();

        let result = d
            .dispatch(
                &llm,
                AskContext {
                    prompt: "你好",
                    site_token: None,
                    caller_supplied_credential: false,
                    memory: &mut mem,
                },
            )
            .await
            .unwrap();

        match result {
            DispatchResult::Conversational { text, degraded, .. } => {
                assert_eq!(degraded, Some(FallbackCause::Unavailable));
                assert!(text.contains("降级应答已启用"));
            }
            _ => panic!("Expected degraded Conversational"),
        }
        // 重试了 max_attempts 次
        assert_eq!(llm.call_count(), 2);
        // 失败请求不写会话记忆
        assert!(mem.chat.is_empty());
    }

    #[tokio::test]
    async fn test_caller_credential_rejection_is_distinct() {
        let site = Arc::new(MockSiteClient::new());
        let d = dispatcher(site);
        let llm =
            MockLlmClient::with_replies(vec![Err(LlmError::Auth("invalid api key".to_string()))]);
        let mut mem = connected_memory();

        let err = d
            .dispatch(
                &llm,
                AskContext {
                    prompt: "hi there",
                    site_token: None,
                    caller_supplied_credential: true,
                    memory: &mut mem,
                },
            )
            .await
            .unwrap_err();

        match err {
            DispatchError::Credential {
                caller_supplied, ..
            } => assert!(caller_supplied),
            _ => panic!("Expected Credential error"),
        }
        // 致命错误只尝试一次
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_shared_quota_exhaustion_degrades_with_note() {
        let site = Arc::new(MockSiteClient::new());
        let d = dispatcher(site);
        let llm = MockLlmClient::with_replies(vec![
            Err(LlmError::RateLimited("quota".to_string())),
            Err(LlmError::RateLimited("quota".to_string())),
        ]);
        let mut mem = connected_memory();

        let result = d
            .dispatch(
                &llm,
                AskContext {
                    prompt: "hello",
                    site_token: None,
                    caller_supplied_credential: false,
                    memory: &mut mem,
                },
            )
            .await
            .unwrap();

        match result {
            DispatchResult::Conversational { text, degraded, .. } => {
                assert_eq!(degraded, Some(FallbackCause::QuotaExhausted));
                assert!(text.contains("API Key"));
            }
            _ => panic!("Expected degraded Conversational"),
        }
    }

    #[tokio::test]
    async fn test_structured_command_from_text_envelope() {
        let site = Arc::new(MockSiteClient::new());
        let d = dispatcher(site);
        let llm = MockLlmClient::with_text(
            r#"{"command": "toggle_maintenance", "parameters": {"on": true}, "explanation": "开启维护模式", "is_safe": false}"#,
        );
        let mut mem = connected_memory();

        let result = d
            .dispatch(
                &llm,
                AskContext {
                    prompt: "开启维护模式",
                    site_token: None,
                    caller_supplied_credential: false,
                    memory: &mut mem,
                },
            )
            .await
            .unwrap();

        match result {
            DispatchResult::StructuredCommand {
                command, is_safe, ..
            } => {
                assert_eq!(command, "toggle_maintenance");
                assert_eq!(is_safe, Some(false));
            }
            _ => panic!("Expected StructuredCommand"),
        }
    }

    #[tokio::test]
    async fn test_advisories_attached_only_to_conversational() {
        let mut site = MockSiteClient::new();
        site.policies = vec![Suggestion {
            id: "p1".to_string(),
            category: "security".to_string(),
            risk: None,
            strength: 3,
            description: "有 2 个插件存在安全更新".to_string(),
            next_step: Some("逐个确认更新".to_string()),
        }];
        let d = dispatcher(Arc::new(site));
        let llm = MockLlmClient::with_text("站点整体状态良好。");
        let mut mem = connected_memory();

        let result = d
            .dispatch(
                &llm,
                AskContext {
                    prompt: "站点状态如何？",
                    site_token: None,
                    caller_supplied_credential: false,
                    memory: &mut mem,
                },
            )
            .await
            .unwrap();

        match result {
            DispatchResult::Conversational { policy_context, .. } => {
                assert_eq!(policy_context.len(), 1);
                assert_eq!(policy_context[0].id, "p1");
            }
            _ => panic!("Expected Conversational"),
        }
    }
}
