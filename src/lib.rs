//! Wasp - Rust 站点智能助手网关
//!
//! 在对话前端与两个不可靠的外部服务（生成式语言服务、远程站点自动化端点）
//! 之间做请求编排与弹性兜底。模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 限流、调度决策、降级应答、建议合并、自愈、错误类型
//! - **gateway**: HTTP 接入层（/ask、/confirm 等端点）
//! - **llm**: LLM 客户端抽象、弹性重试与实现（OpenAI 兼容 / Mock）
//! - **memory**: 有界对话窗口与会话记忆（仅进程生命周期）
//! - **site**: 站点协作方边界（能力发现、顾问、动作执行）

pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod site;
