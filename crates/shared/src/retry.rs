//! 重试策略与执行器
//!
//! 提供线性退避重试机制，用于瞬时故障（broker 抖动、leader 切换等）的自动恢复。
//! 是否重试由调用方通过 `is_retryable` 闭包判定，序列化失败等确定性错误直接返回。

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

// ---------------------------------------------------------------------------
// BackoffPolicy — 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// 线性退避：第 N 次失败后等待 `base_delay * N`。
/// 首次执行之外最多重试 `max_retries` 次，即总共最多 `max_retries + 1` 次尝试。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// 最大重试次数（不含首次执行）
    pub max_retries: u32,
    /// 退避基数
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    /// 默认策略：最多重试 3 次，基数 500ms
    fn default() -> Self {
        Self::linear(3, Duration::from_millis(500))
    }
}

impl BackoffPolicy {
    pub fn linear(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// 总尝试次数上限
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// 第 `attempt` 次尝试失败后的等待时间（attempt 从 1 开始）
    ///
    /// 公式: base_delay * attempt。attempt 为 0 时没有等待。
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// 第 `attempt` 次尝试失败后是否还应继续重试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

// ---------------------------------------------------------------------------
// RetryError — 重试耗尽后的错误
// ---------------------------------------------------------------------------

/// 重试失败结果，保留实际尝试次数和最后一次错误
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} 次尝试后失败: {}", self.attempts, self.last_error)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.last_error)
    }
}

// ---------------------------------------------------------------------------
// retry_with_policy — 带重试的异步执行器
// ---------------------------------------------------------------------------

/// 带重试的异步执行器
///
/// 对任意异步操作应用重试策略，`operation` 收到当前尝试序号（从 1 开始）。
/// 仅在操作返回可重试错误时才重试，其余错误直接返回。
/// 退避使用 `tokio::time::sleep`，只挂起当前这一个 future。
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &BackoffPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt: u32 = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "操作在重试后成功");
                }
                return Ok(value);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "操作失败且不可重试，直接返回错误"
                    );
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: err,
                    });
                }

                if !policy.should_retry(attempt) {
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_retries = policy.max_retries,
                        error = %err,
                        "已达最大重试次数，放弃重试"
                    );
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: err,
                    });
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "操作失败，将在退避后重试"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::ActivityError;

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_delay_for_attempt_linear() {
        let policy = BackoffPolicy::linear(5, Duration::from_millis(100));

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_should_retry() {
        let policy = BackoffPolicy::linear(2, Duration::from_millis(1));

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        // 第 3 次尝试已是最后一次
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_zero_retries_means_single_attempt() {
        let policy = BackoffPolicy::linear(0, Duration::from_millis(1));
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1));
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let policy = BackoffPolicy::default();
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let result = retry_with_policy(
            &policy,
            "test_op",
            |_: &ActivityError| true,
            |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ActivityError>(42)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let policy = BackoffPolicy::linear(2, Duration::from_millis(100));
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorder = seen.clone();

        let result = retry_with_policy(
            &policy,
            "test_op",
            |_: &ActivityError| true,
            |attempt| {
                let recorder = recorder.clone();
                async move {
                    recorder.lock().push(attempt);
                    if attempt < 3 {
                        Err(ActivityError::Kafka("模拟瞬时故障".to_string()))
                    } else {
                        Ok(99)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(*seen.lock(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_and_waits_linearly() {
        let policy = BackoffPolicy::linear(2, Duration::from_millis(100));
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();
        let start = tokio::time::Instant::now();

        let result: Result<i32, _> = retry_with_policy(
            &policy,
            "test_op",
            |_: &ActivityError| true,
            |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ActivityError::Kafka(format!("持续故障 #{attempt}")))
                }
            },
        )
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error.to_string(), "Kafka 错误: 持续故障 #3");
        assert_eq!(call_count.load(Ordering::SeqCst), 3);

        // 100ms * 1 + 100ms * 2，最后一次失败后不再等待
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let policy = BackoffPolicy::linear(5, Duration::from_millis(1));
        let call_count = Arc::new(AtomicU32::new(0));
        let counter = call_count.clone();

        let result: Result<(), _> = retry_with_policy(
            &policy,
            "test_op",
            ActivityError::is_retryable,
            |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ActivityError::Internal("逻辑错误".to_string()))
                }
            },
        )
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
