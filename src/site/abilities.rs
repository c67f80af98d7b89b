//! 站点能力描述
//!
//! 能力由远程站点按请求提供，本层不做缓存（缓存是站点侧的事，这里只透传提示）。

use serde::{Deserialize, Serialize};

use crate::llm::ToolSpec;

/// 能力的风险等级
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Read,
    Write,
    Destructive,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Read => write!(f, "read"),
            RiskLevel::Write => write!(f, "write"),
            RiskLevel::Destructive => write!(f, "destructive"),
        }
    }
}

/// 远程站点公开的一项能力
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AbilityDescriptor {
    pub name: String,
    pub description: String,
    /// 参数的 JSON Schema
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub risk: RiskLevel,
    /// 站点侧缓存提示（如有），仅透传
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hint: Option<String>,
}

impl AbilityDescriptor {
    /// 转为发给 LLM 的工具定义；描述中附上风险等级，便于模型解释
    pub fn to_tool_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: format!("{} (risk: {})", self.description, self.risk),
            parameters: self.parameters.clone(),
        }
    }
}
