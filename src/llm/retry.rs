//! 弹性调用：有界重试 + 指数退避
//!
//! 仅对 LlmError::is_retryable 的瞬态错误重试；第 n 次尝试（n ≥ 2）前
//! 等待 2^(n-1) 秒。睡眠通过 Sleeper 注入，测试无需真实计时器。
//! 主调度与自愈路径共用本模块。

use std::time::Duration;

use async_trait::async_trait;

use super::traits::LlmError;

/// 重试策略：最大尝试次数（含首次）
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// 可注入的睡眠依赖
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// 生产实现：tokio 计时器
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// 第 attempt 次尝试（attempt ≥ 2）前的退避时长：2^(attempt-1) 秒
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << (attempt - 1))
}

/// 以重试策略执行 op；致命错误首次即返回，瞬态错误重试至耗尽后
/// 原样抛出最后一个错误（保留分类供上层映射响应）。
pub async fn call_with_retry<T, Op, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: Op,
) -> Result<T, LlmError>
where
    Op: FnMut() -> Fut + Send,
    Fut: std::future::Future<Output = Result<T, LlmError>> + Send,
    T: Send,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if attempt > 1 {
            sleeper.sleep(backoff_delay(attempt)).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if e.is_retryable() && attempt < max_attempts {
                    tracing::warn!(attempt, error = %e, "transient upstream error, retrying");
                    continue;
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// 记录每次 sleep 时长，不真正等待
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn new() -> Self {
            Self {
                delays: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    #[tokio::test]
    async fn test_retries_transient_until_exhausted_with_backoff() {
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 3 };

        let result: Result<(), LlmError> = call_with_retry(&policy, &sleeper, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Unavailable("503".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 第 2 次尝试前 2s，第 3 次尝试前 4s
        let delays = sleeper.delays.lock().unwrap();
        assert_eq!(*delays, vec![Duration::from_secs(2), Duration::from_secs(4)]);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_after_one_attempt() {
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 5 };

        let result: Result<(), LlmError> = call_with_retry(&policy, &sleeper, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Auth("bad key".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let sleeper = RecordingSleeper::new();
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy { max_attempts: 3 };

        let result = call_with_retry(&policy, &sleeper, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(LlmError::Timeout)
                } else {
                    Ok("ok".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
