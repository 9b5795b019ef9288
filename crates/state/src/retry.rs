//! 瞬时数据库错误的重试
//!
//! 序列化冲突与死锁按策略做指数退避重试，并加入随机抖动以避免
//! 多个分发器同步重试。

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use shepherd_errors::{ShepherdError, ShepherdResult};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval_ms: 50,
            max_interval_ms: 2000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    fn interval(&self, retry: u32) -> Duration {
        let exponential =
            self.base_interval_ms as f64 * self.backoff_multiplier.powi(retry as i32);
        let capped = exponential.min(self.max_interval_ms as f64);
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        Duration::from_millis((capped + jitter).max(1.0) as u64)
    }
}

/// 执行一个状态库操作，瞬时错误按策略重试
pub async fn with_transient_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> ShepherdResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ShepherdResult<T>>,
{
    let mut retry = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && retry < policy.max_retries => {
                let wait = policy.interval(retry);
                retry += 1;
                debug!(
                    "{} 遇到瞬时错误 ({err})，第 {} 次重试，等待 {:?}",
                    operation, retry, wait
                );
                tokio::time::sleep(wait).await;
            }
            Err(err) => {
                if err.is_transient() {
                    warn!("{} 的瞬时错误重试次数耗尽: {err}", operation);
                }
                return Err(err);
            }
        }
    }
}
