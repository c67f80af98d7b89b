//! 按客户端身份的固定窗口限流
//!
//! check 只读、commit 记账（成功后才调用，见 DESIGN.md「charge-on-success」）。
//! 存储抽象为 RateLimitStore，单实例部署用内存表；定期 sweep 清掉
//! 关窗超过一个完整窗口的记录，让内存只随活跃客户端增长。

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// 单个客户端的窗口记录
#[derive(Clone, Debug)]
pub struct RateLimitRecord {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// 限流判定结果
#[derive(Clone, Debug)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    /// 距重置的整分钟数（向上取整），仅在拒绝时对用户有意义
    pub retry_after_minutes: i64,
}

/// 限流存储接口（单实例用内存表；多实例可换共享计数服务）
pub trait RateLimitStore: Send + Sync {
    fn get(&self, identity: &str) -> Option<RateLimitRecord>;
    fn put(&self, identity: &str, record: RateLimitRecord);
    /// 移除 window_end 早于 cutoff 的记录，返回移除数量
    fn remove_closed_before(&self, cutoff: DateTime<Utc>) -> usize;
}

/// 内存存储：Mutex<HashMap>
#[derive(Default)]
pub struct MemoryRateLimitStore {
    records: Mutex<HashMap<String, RateLimitRecord>>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    fn get(&self, identity: &str) -> Option<RateLimitRecord> {
        self.records.lock().unwrap().get(identity).cloned()
    }

    fn put(&self, identity: &str, record: RateLimitRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(identity.to_string(), record);
    }

    fn remove_closed_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, r| r.window_end >= cutoff);
        before - records.len()
    }
}

/// 固定窗口限流器
pub struct RateLimiter {
    store: Box<dyn RateLimitStore>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Box<dyn RateLimitStore>, limit: u32, window_secs: i64) -> Self {
        Self {
            store,
            limit,
            window: Duration::seconds(window_secs),
        }
    }

    pub fn in_memory(limit: u32, window_secs: i64) -> Self {
        Self::new(Box::new(MemoryRateLimitStore::new()), limit, window_secs)
    }

    /// 只读判定：不创建也不修改记录，连续 check 返回相同的 remaining
    pub fn check(&self, identity: &str) -> RateLimitDecision {
        self.check_at(identity, Utc::now())
    }

    pub fn check_at(&self, identity: &str, now: DateTime<Utc>) -> RateLimitDecision {
        match self.store.get(identity) {
            Some(r) if now < r.window_end => {
                let allowed = r.count < self.limit;
                let remaining = self.limit.saturating_sub(r.count);
                RateLimitDecision {
                    allowed,
                    remaining,
                    reset_at: r.window_end,
                    retry_after_minutes: minutes_until(now, r.window_end),
                }
            }
            // 无记录或窗口已过：视为全新窗口
            _ => RateLimitDecision {
                allowed: true,
                remaining: self.limit,
                reset_at: now + self.window,
                retry_after_minutes: minutes_until(now, now + self.window),
            },
        }
    }

    /// 记账：上游调用成功后调用，且每个被接受的请求只调用一次。
    /// check 与 commit 之间隔着一次挂起的 LLM 调用，同一身份的并发请求
    /// 可能都先通过 check，窗口计数最多瞬时超限「并发数-1」；对这种
    /// 顾问性质的配额可以接受，margin 记录于 DESIGN.md。
    pub fn commit(&self, identity: &str) {
        self.commit_at(identity, Utc::now());
    }

    pub fn commit_at(&self, identity: &str, now: DateTime<Utc>) {
        let record = match self.store.get(identity) {
            Some(mut r) if now < r.window_end => {
                r.count += 1;
                r
            }
            _ => RateLimitRecord {
                count: 1,
                window_start: now,
                window_end: now + self.window,
            },
        };
        self.store.put(identity, record);
    }

    /// 清理关窗超过一个完整窗口的记录
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        self.store.remove_closed_before(now - self.window)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

/// 距 deadline 的整分钟数，向上取整，至少 1 分钟
fn minutes_until(now: DateTime<Utc>, deadline: DateTime<Utc>) -> i64 {
    let secs = (deadline - now).num_seconds().max(0);
    (secs + 59) / 60
}
