//! 调度全流程集成测试：Mock LLM + Mock 站点

use std::sync::Arc;

use wasp::core::{
    detect_failure, AskContext, AutoHealer, DispatchResult, Dispatcher, RateLimiter,
};
use wasp::llm::{LlmError, LlmReply, MockLlmClient, RetryPolicy, TokioSleeper};
use wasp::memory::{Role, SessionMemory, SiteContext};
use wasp::site::{AbilityDescriptor, ActionOutcome, MockSiteClient, RiskLevel};

fn dispatcher(site: Arc<MockSiteClient>) -> Dispatcher {
    Dispatcher::new(
        site,
        RetryPolicy { max_attempts: 3 },
        Arc::new(TokioSleeper),
    )
}

fn connected_memory() -> SessionMemory {
    let mut mem = SessionMemory::new(10, 20);
    mem.site_context = Some(SiteContext {
        site_url: "https://shop.example.com".to_string(),
        site_name: Some("Example Shop".to_string()),
        summary: Some("WooCommerce, 12 个插件".to_string()),
    });
    mem
}

#[tokio::test]
async fn test_stateless_list_plugins_touches_nothing() {
    let site = Arc::new(MockSiteClient::new());
    let d = dispatcher(site.clone());
    let llm = MockLlmClient::with_text("需要先连接站点才能列出插件。");
    let mut mem = SessionMemory::new(10, 20);

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
    // 无状态模式：发现 / 策略 / 工作流 / 远程执行一个都不碰
    assert_eq!(site.total_calls(), 0);
    // 回复也不进入持久会话历史
    assert!(mem.chat.is_empty());
}

#[tokio::test]
async fn test_contextual_tool_call_requires_separate_confirm() {
    let site = Arc::new(MockSiteClient::new().with_abilities(vec![AbilityDescriptor {
        name: "delete_post".to_string(),
        description: "删除指定文章".to_string(),
        parameters: serde_json::json!({"type": "object", "properties": {"id": {"type": "integer"}}}),
        risk: RiskLevel::Destructive,
        cache_hint: None,
    }]));
    let d = dispatcher(site.clone());
    let llm = MockLlmClient::with_replies(vec![Ok(LlmReply::FunctionCall {
        name: "delete_post".to_string(),
        arguments: serde_json::json!({"id": 42}),
    })]);
    let mut mem = connected_memory();

    let result = d
        .dispatch(
            &llm,
            AskContext {
                prompt: "把 42 号文章删掉",
                site_token: Some("site-token"),
                caller_supplied_credential: false,
                memory: &mut mem,
            },
        )
        .await
        .unwrap();

    // 函数调用被分类为待确认动作，且没有任何远程执行发生
    match result {
        DispatchResult::PendingConfirmation { action, .. } => {
            assert_eq!(action.ability, "delete_post");
        }
        other => panic!("Expected PendingConfirmation, got {:?}", other),
    }
    assert_eq!(
        site.execute_calls.load(std::sync::atomic::Ordering::SeqCst),
        0
    );
    // 发现 / 策略 / 工作流各被咨询一次
    assert_eq!(site.discover_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(site.policy_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(site.workflow_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_permission_denied_triggers_isolated_healing_once() {
    let outcome = ActionOutcome {
        success: true,
        message: Some("Update failed: Permission Denied for current user".to_string()),
        response: None,
    };
    // 大小写不敏感命中
    assert!(detect_failure(&outcome, &[]).is_some());

    let healer = AutoHealer::new(
        RetryPolicy { max_attempts: 2 },
        Arc::new(TokioSleeper),
        vec![],
    );
    let llm = MockLlmClient::with_text("当前用户缺少插件更新权限，请切换管理员账号。");
    let mut mem = connected_memory();
    mem.record(Role::User, "帮我更新 akismet");
    mem.record(Role::Assistant, "将执行 update_plugin，待确认。");
    let history_before = mem.chat.len();

    let recovery = healer
        .heal(&llm, "update_plugin akismet", "Permission Denied for current user")
        .await;

    // 恢复建议有明确标签，且自愈恰好调用一次 LLM
    assert!(recovery.starts_with("[自动恢复建议"));
    assert_eq!(llm.call_count(), 1);
    // 自愈的问答对不进入会话历史
    assert_eq!(mem.chat.len(), history_before);
    assert!(mem
        .chat
        .entries()
        .iter()
        .all(|e| !e.message.contains("恢复建议")));
}

#[tokio::test]
async fn test_degraded_reply_keeps_serving_after_outage() {
    let site = Arc::new(MockSiteClient::new());
    let d = dispatcher(site);
    // 三次都是瞬态失败：重试耗尽后走降级应答器而不是报错
    let llm = MockLlmClient::with_replies(vec![
        Err(LlmError::Network("connection refused".to_string())),
        Err(LlmError::Network("connection refused".to_string())),
        Err(LlmError::Network("connection refused".to_string())),
    ]);
    let mut mem = connected_memory();

    let result = d
        .dispatch(
            &llm,
            AskContext {
                prompt: "帮我看看插件",
                site_token: None,
                caller_supplied_credential: false,
                memory: &mut mem,
            },
        )
        .await
        .unwrap();

    match result {
        DispatchResult::Conversational { text, degraded, .. } => {
            assert!(degraded.is_some());
            // 命中 plugins 降级规则，并附服务不可达说明
            assert!(text.contains("插件"));
            assert!(text.contains("降级应答已启用"));
        }
        other => panic!("Expected degraded Conversational, got {:?}", other),
    }
    assert_eq!(llm.call_count(), 3);
}

#[tokio::test]
async fn test_rate_limit_full_cycle_with_charge_on_success() {
    let limiter = RateLimiter::in_memory(2, 3600);

    // check 不记账：连续 check 的 remaining 不变
    assert_eq!(limiter.check("9.9.9.9").remaining, 2);
    assert_eq!(limiter.check("9.9.9.9").remaining, 2);

    limiter.commit("9.9.9.9");
    limiter.commit("9.9.9.9");
    let decision = limiter.check("9.9.9.9");
    assert!(!decision.allowed);
    assert!(decision.retry_after_minutes >= 1);

    // 其他身份不受影响（自带 Key 的调用方根本不会走到这里）
    assert!(limiter.check("8.8.8.8").allowed);
}

#[tokio::test]
async fn test_caller_key_rejection_distinct_and_uncharged() {
    let site = Arc::new(MockSiteClient::new());
    let d = dispatcher(site);
    let llm = MockLlmClient::with_replies(vec![Err(LlmError::Auth(
        "Incorrect API key provided".to_string(),
    ))]);
    let mut mem = connected_memory();

    let err = d
        .dispatch(
            &llm,
            AskContext {
                prompt: "hello",
                site_token: None,
                caller_supplied_credential: true,
                memory: &mut mem,
            },
        )
        .await
        .unwrap_err();

    let message = err.user_message();
    assert!(message.contains("你提供的"));
    assert_eq!(err.status_code(), 401);
    // 致命错误一次即止，不重试
    assert_eq!(llm.call_count(), 1);
}
