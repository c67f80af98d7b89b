//! HTTP 网关：对话前端的接入层
//!
//! 端点：
//! - `POST /ask`：自由文本 -> 对话回复或待确认动作
//! - `POST /confirm`：显式确认后执行（或干跑）远程动作
//! - `POST /session/clear`：显式清空会话记忆
//! - `GET /health`：存活探针

pub mod message;
pub mod routes;

pub use message::{
    AskRequest, AskResponse, ClearSessionRequest, ConfirmRequest, ConfirmResponse,
    HistoryEntryIn, RateLimitInfo, ReplyEnvelope,
};
pub use routes::{create_router, AppState};
