//! HTTP 网关：路由与处理器
//!
//! POST /ask 是主入口：校验 -> （无自带 Key 时）限流判定 -> 调度 -> 成功后记账。
//! POST /confirm 执行已确认的动作并触发失败检测 / 自愈。
//! 限流身份取连接地址；自带 `x-llm-api-key` 的调用方完全绕过本地限流。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};

use crate::config::AppConfig;
use crate::core::{AskContext, AutoHealer, DispatchError, Dispatcher, RateLimiter};
use crate::gateway::message::{
    AskRequest, AskResponse, ClearSessionRequest, ConfirmRequest, ConfirmResponse, RateLimitInfo,
    ReplyEnvelope,
};
use crate::llm::{LlmClient, OpenAiClient};
use crate::memory::{Role, SessionStore};
use crate::site::SiteClient;

/// 网关共享状态
pub struct AppState {
    pub config: AppConfig,
    pub dispatcher: Dispatcher,
    pub healer: AutoHealer,
    pub limiter: RateLimiter,
    pub sessions: Arc<SessionStore>,
    pub shared_llm: Arc<dyn LlmClient>,
    pub site: Arc<dyn SiteClient>,
}

/// 创建网关路由
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ask", post(api_ask))
        .route("/confirm", post(api_confirm))
        .route("/session/clear", post(api_session_clear))
        .route("/health", get(api_health))
        .with_state(state)
}

const MAX_PROMPT_CHARS: usize = 10_000;
const MAX_INBOUND_HISTORY: usize = 10;

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn error_response(
    err: &DispatchError,
    rate_limit: Option<RateLimitInfo>,
) -> (StatusCode, Json<AskResponse>) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(AskResponse {
            status: "error",
            reply: ReplyEnvelope::from_error(err),
            rate_limit,
        }),
    )
}

/// POST /ask - 主入口
async fn api_ask(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<AskRequest>,
) -> (StatusCode, Json<AskResponse>) {
    // 输入校验：空或超长 prompt、超限历史一律 400，不消耗任何额度
    if req.prompt.trim().is_empty() {
        return error_response(&DispatchError::Validation("prompt 不能为空".into()), None);
    }
    if req.prompt.chars().count() > MAX_PROMPT_CHARS {
        return error_response(
            &DispatchError::Validation(format!("prompt 超过 {} 字符上限", MAX_PROMPT_CHARS)),
            None,
        );
    }
    if let Some(history) = &req.chat_history {
        if history.len() > MAX_INBOUND_HISTORY {
            return error_response(
                &DispatchError::Validation(format!(
                    "chat_history 最多 {} 条",
                    MAX_INBOUND_HISTORY
                )),
                None,
            );
        }
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    let identity = addr.ip().to_string();
    let caller_key = header_value(&headers, "x-llm-api-key");
    let site_token = header_value(&headers, "x-site-token");
    tracing::debug!(%request_id, identity = %identity, "ask received");

    // 自带 Key 的调用方绕过本地限流，其额度问题由上游裁决
    if caller_key.is_none() {
        let decision = state.limiter.check(&identity);
        if !decision.allowed {
            tracing::info!(identity = %identity, "rate limit exceeded");
            return error_response(
                &DispatchError::RateLimited {
                    retry_after_minutes: decision.retry_after_minutes,
                },
                Some(RateLimitInfo {
                    limit: state.limiter.limit(),
                    remaining: decision.remaining,
                    reset_at: decision.reset_at.to_rfc3339(),
                }),
            );
        }
    }

    let session_id = req
        .session_id
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("addr:{}", identity));

    // 取出会话以释放锁，避免持锁期间调用 LLM
    let mut memory = state.sessions.take(&session_id).await;
    memory.site_context = req.site_context.clone();
    if memory.chat.is_empty() {
        if let Some(history) = &req.chat_history {
            for entry in history {
                let role = match entry.role.as_str() {
                    "assistant" => Role::Assistant,
                    _ => Role::User,
                };
                memory.record(role, entry.message.clone());
            }
        }
    }

    let llm: Arc<dyn LlmClient> = match &caller_key {
        Some(key) => Arc::new(OpenAiClient::new(
            state.config.llm.base_url.as_deref(),
            &state.config.llm.model,
            Some(key),
        )),
        None => state.shared_llm.clone(),
    };

    let result = state
        .dispatcher
        .dispatch(
            llm.as_ref(),
            AskContext {
                prompt: &req.prompt,
                site_token: site_token.as_deref(),
                caller_supplied_credential: caller_key.is_some(),
                memory: &mut memory,
            },
        )
        .await;

    state.sessions.put(&session_id, memory).await;

    match result {
        Ok(res) => {
            // charge-on-success：成功后才记账，且每个被接受的请求只记一次。
            // check 与这里之间隔着挂起的 LLM 调用，同一身份的并发请求可能
            // 都先通过 check，瞬时超限幅度 ≤ 并发数-1（见 DESIGN.md）。
            let rate_limit = if caller_key.is_none() {
                state.limiter.commit(&identity);
                let d = state.limiter.check(&identity);
                Some(RateLimitInfo {
                    limit: state.limiter.limit(),
                    remaining: d.remaining,
                    reset_at: d.reset_at.to_rfc3339(),
                })
            } else {
                None
            };
            (
                StatusCode::OK,
                Json(AskResponse {
                    status: "ok",
                    reply: ReplyEnvelope::from_result(res),
                    rate_limit,
                }),
            )
        }
        Err(e) => {
            tracing::warn!(%request_id, error = %e, "dispatch failed");
            error_response(&e, None)
        }
    }
}

/// POST /confirm - 执行（或干跑）一个已确认的动作，并按需触发自愈
async fn api_confirm(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ConfirmRequest>,
) -> (StatusCode, Json<ConfirmResponse>) {
    let token = header_value(&headers, "x-site-token").unwrap_or_default();
    let command_desc = format!("{} {}", req.action.ability, req.action.arguments);

    match state.site.execute_action(&req.action, &token).await {
        Ok(outcome) => {
            let signature = if state.config.healing.enabled {
                state.healer.detect(&outcome)
            } else {
                None
            };
            let success = outcome.success && signature.is_none();

            if let Some(sid) = req.session_id.as_deref().filter(|s| !s.is_empty()) {
                state
                    .sessions
                    .with_session(sid, |m| {
                        m.record_action(req.action.ability.as_str(), command_desc.as_str(), success)
                    })
                    .await;
            }

            // 自愈：孤立的诊断调用，问答对不进入会话记忆
            let recovery = match signature {
                Some(sig) => {
                    tracing::info!(?sig, ability = %req.action.ability, "failure signature detected");
                    let failure_message = outcome
                        .message
                        .clone()
                        .or_else(|| outcome.response.as_ref().map(|v| v.to_string()))
                        .unwrap_or_else(|| "unknown failure".to_string());
                    Some(
                        state
                            .healer
                            .heal(state.shared_llm.as_ref(), &command_desc, &failure_message)
                            .await,
                    )
                }
                None => None,
            };

            (
                StatusCode::OK,
                Json(ConfirmResponse {
                    status: "ok",
                    success,
                    message: outcome.message,
                    response: outcome.response,
                    recovery,
                }),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "remote action call failed");
            if let Some(sid) = req.session_id.as_deref().filter(|s| !s.is_empty()) {
                state
                    .sessions
                    .with_session(sid, |m| {
                        m.record_action(req.action.ability.as_str(), command_desc.as_str(), false)
                    })
                    .await;
            }
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ConfirmResponse {
                    status: "error",
                    success: false,
                    message: Some("站点暂时不可达，动作未执行。".to_string()),
                    response: None,
                    recovery: None,
                }),
            )
        }
    }
}

/// GET /health - 存活探针，附活跃会话数与共享客户端的累计 token 用量
async fn api_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let (prompt, completion, total) = state.shared_llm.token_usage();
    Json(serde_json::json!({
        "status": "ok",
        "active_sessions": state.sessions.active_count().await,
        "token_usage": {
            "prompt": prompt,
            "completion": completion,
            "total": total,
        },
    }))
}

/// POST /session/clear - 显式清空会话（站点仍连接时重新播种站点上下文）
async fn api_session_clear(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClearSessionRequest>,
) -> StatusCode {
    let Some(session_id) = req.session_id.filter(|s| !s.is_empty()) else {
        return StatusCode::OK;
    };
    state.sessions.clear(&session_id).await;
    StatusCode::OK
}
