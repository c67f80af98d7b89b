//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WASP__*` 覆盖（双下划线表示嵌套，
//! 如 `WASP__RATE_LIMIT__LIMIT=100`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub healing: HealingSection,
}

/// [server] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8090
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// [llm] 段：OpenAI 兼容端点与重试上限
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 共享 Key 所在的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// 弹性调用的最大尝试次数（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// [rate_limit] 段：固定窗口限流，仅对未自带 Key 的调用方生效
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: i64,
}

fn default_rate_limit() -> u32 {
    20
}

fn default_window_secs() -> i64 {
    3600
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
            window_secs: default_window_secs(),
        }
    }
}

/// [session] 段：会话记忆窗口上限与空闲超时
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_max_chat_entries")]
    pub max_chat_entries: usize,
    #[serde(default = "default_max_actions")]
    pub max_actions: usize,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: i64,
}

fn default_max_chat_entries() -> usize {
    10
}

fn default_max_actions() -> usize {
    20
}

fn default_idle_timeout_secs() -> i64 {
    3600
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_chat_entries: default_max_chat_entries(),
            max_actions: default_max_actions(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

/// [site] 段：站点协作方调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct SiteSection {
    #[serde(default = "default_site_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_site_timeout_secs() -> u64 {
    15
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_site_timeout_secs(),
        }
    }
}

/// [healing] 段：自愈开关与自定义失败短语
#[derive(Debug, Clone, Deserialize)]
pub struct HealingSection {
    #[serde(default = "default_healing_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub extra_phrases: Vec<String>,
}

fn default_healing_enabled() -> bool {
    true
}

impl Default for HealingSection {
    fn default() -> Self {
        Self {
            enabled: default_healing_enabled(),
            extra_phrases: Vec::new(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            llm: LlmSection::default(),
            rate_limit: RateLimitSection::default(),
            session: SessionSection::default(),
            site: SiteSection::default(),
            healing: HealingSection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 WASP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WASP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WASP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bounds() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.session.max_chat_entries, 10);
        assert_eq!(cfg.session.max_actions, 20);
        assert_eq!(cfg.rate_limit.window_secs, 3600);
        assert_eq!(cfg.llm.max_attempts, 3);
    }
}
