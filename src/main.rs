//! Wasp - Rust 站点智能助手网关
//!
//! 入口：初始化日志、加载配置、装配组件并启动 HTTP 服务；
//! 后台定期清理限流记录与过期会话。

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use wasp::config::{load_config, AppConfig};
use wasp::core::{AutoHealer, Dispatcher, RateLimiter};
use wasp::gateway::{create_router, AppState};
use wasp::llm::{LlmClient, MockLlmClient, OpenAiClient, RetryPolicy, TokioSleeper};
use wasp::memory::create_session_store;
use wasp::site::HttpSiteClient;

/// 根据配置与环境变量创建共享 LLM 客户端；无 Key 时退化为 Mock
fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    match std::env::var(&cfg.llm.api_key_env) {
        Ok(key) if !key.is_empty() => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.llm.model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(&key),
            ))
        }
        _ => {
            tracing::warn!(
                "No API key in ${}, using Mock LLM (callers can still bring their own key)",
                cfg.llm.api_key_env
            );
            Arc::new(MockLlmClient::new())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wasp::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let retry = RetryPolicy {
        max_attempts: cfg.llm.max_attempts,
    };
    let sleeper = Arc::new(TokioSleeper);
    let shared_llm = create_llm_from_config(&cfg);
    let site = Arc::new(HttpSiteClient::new(cfg.site.request_timeout_secs));

    let sessions = create_session_store(
        cfg.session.max_chat_entries,
        cfg.session.max_actions,
        cfg.session.idle_timeout_secs,
    );

    let state = Arc::new(AppState {
        dispatcher: Dispatcher::new(site.clone(), retry, sleeper.clone()),
        healer: AutoHealer::new(retry, sleeper, cfg.healing.extra_phrases.clone()),
        limiter: RateLimiter::in_memory(cfg.rate_limit.limit, cfg.rate_limit.window_secs),
        sessions: sessions.clone(),
        shared_llm,
        site,
        config: cfg.clone(),
    });

    // 定期清理：关窗超过一个完整窗口的限流记录
    let sweep_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = sweep_state.limiter.sweep();
            if removed > 0 {
                tracing::debug!(removed, "rate limit records swept");
            }
        }
    });

    // 定期清理：空闲超时的会话
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = sessions.cleanup_expired().await;
            if removed > 0 {
                tracing::debug!(removed, "expired sessions cleaned");
            }
        }
    });

    let app = create_router(Arc::clone(&state));
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.server.port));
    tracing::info!("Wasp gateway listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind gateway port")?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Gateway serve failed")?;

    Ok(())
}
