//! 站点协作方边界：能力发现、策略 / 工作流顾问、动作执行
//!
//! 本层只定义边界与 HTTP 实现；站点自身的命令执行引擎、凭据存储等
//! 都是外部协作方的职责。

pub mod abilities;
pub mod actions;
pub mod client;
pub mod mock;

pub use abilities::{AbilityDescriptor, RiskLevel};
pub use actions::{ActionMode, ActionOutcome, PendingAction};
pub use client::{HttpSiteClient, SiteClient, SiteError};
pub use mock::MockSiteClient;
