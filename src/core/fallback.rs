//! 降级应答器
//!
//! 生成服务不可达或其输出无法解析时使用的确定性回复。规则表自上而下
//! 求值，首条命中即停（平手按表序裁决）；末条为兜底规则，匹配一切。
//! 关键词中英双语，大小写不敏感。

/// 触发降级的原因；额度耗尽与服务不可达的用户补救方式不同
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackCause {
    /// 共享额度耗尽：等待，或自带 API Key
    QuotaExhausted,
    /// 服务不可达：稍后重试
    Unavailable,
}

/// 一条降级规则：关键词命中即返回模板；keywords 为空表示匹配一切
struct FallbackRule {
    name: &'static str,
    keywords: &'static [&'static str],
    response: &'static str,
}

/// 规则表：顺序即优先级
const RULES: &[FallbackRule] = &[
    FallbackRule {
        name: "greeting",
        keywords: &["hello", "hi ", "你好", "您好", "嗨"],
        response: "你好！我是站点助手。智能服务暂时不可用，但你仍然可以问我站点管理的常见问题。",
    },
    FallbackRule {
        name: "help",
        keywords: &["help", "how do i", "怎么", "如何", "帮助"],
        response: "我可以帮你管理站点：查看插件、更新、备份等。智能服务恢复后即可用自然语言下达指令。",
    },
    FallbackRule {
        name: "plugins",
        keywords: &["plugin", "插件"],
        response: "插件操作需要智能服务在线才能安全地生成。你可以先在站点后台的插件页查看已安装列表。",
    },
    FallbackRule {
        name: "update",
        keywords: &["update", "upgrade", "更新", "升级"],
        response: "更新操作涉及站点变更，需在智能服务恢复后逐项确认再执行，以免误操作。",
    },
    FallbackRule {
        name: "backup",
        keywords: &["backup", "备份"],
        response: "建议在任何变更前先备份。请使用站点后台的备份工具，或等智能服务恢复后由我代为安排。",
    },
    FallbackRule {
        name: "status",
        keywords: &["status", "状态", "site", "站点"],
        response: "站点本身运行正常；当前只是智能回复服务不可用，站点数据不受影响。",
    },
    // 兜底：必须保留在表尾
    FallbackRule {
        name: "default",
        keywords: &[],
        response: "抱歉，智能服务暂时不可用，我现在只能提供预设回复。请稍后重试。",
    },
];

/// 纯函数：按规则表生成降级回复；errorContext 存在时附加原因说明
pub fn respond(user_input: &str, cause: Option<FallbackCause>) -> String {
    let input = user_input.to_lowercase();
    let rule = RULES
        .iter()
        .find(|r| r.keywords.is_empty() || r.keywords.iter().any(|k| input.contains(k)))
        .unwrap_or(&RULES[RULES.len() - 1]);

    tracing::debug!(rule = rule.name, "fallback rule matched");

    match cause {
        Some(FallbackCause::QuotaExhausted) => format!(
            "{}\n\n（注：共享服务额度已用尽，可稍后重试，或在请求头提供你自己的 API Key 立即恢复。）",
            rule.response
        ),
        Some(FallbackCause::Unavailable) => format!(
            "{}\n\n（注：上游服务暂时不可达，降级应答已启用，请稍后重试。）",
            rule.response
        ),
        None => rule.response.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins_by_table_order() {
        // 同时包含 "插件" 与 "更新"，按表序命中 plugins 规则
        let reply = respond("帮我更新插件", None);
        assert!(reply.contains("插件操作"));
    }

    #[test]
    fn test_default_rule_matches_anything() {
        let reply = respond("qwertyuiop", None);
        assert!(reply.contains("预设回复"));
    }

    #[test]
    fn test_case_insensitive_english_keywords() {
        let reply = respond("Can you UPDATE my theme?", None);
        assert!(reply.contains("更新操作"));
    }

    #[test]
    fn test_quota_note_differs_from_unavailable_note() {
        let quota = respond("hello there", Some(FallbackCause::QuotaExhausted));
        let down = respond("hello there", Some(FallbackCause::Unavailable));
        assert!(quota.contains("API Key"));
        assert!(down.contains("稍后重试"));
        assert_ne!(quota, down);
    }

    #[test]
    fn test_no_cause_no_note() {
        let reply = respond("你好", None);
        assert!(!reply.contains("注："));
    }
}
