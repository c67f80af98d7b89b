//! 记忆层：有界对话窗口与会话记忆（仅进程生命周期，无持久化）

pub mod conversation;
pub mod session;

pub use conversation::{ChatEntry, ChatWindow, Message, Role};
pub use session::{
    create_session_store, ExecutedAction, SessionMemory, SessionStore, SiteContext,
};
