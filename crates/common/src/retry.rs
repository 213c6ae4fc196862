//! 可重试操作的有界重试, 指数退避加随机抖动

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use cronflow_errors::SchedResult;

use crate::constants::{
    RETRY_ATTEMPTS, RETRY_BACKOFF_MULTIPLIER, RETRY_BASE_INTERVAL_MS, RETRY_JITTER_FACTOR,
};

/// 执行`op`, 对可重试错误（事务冲突、后端暂时不可用）最多尝试
/// [`RETRY_ATTEMPTS`]次; 其余错误直接返回。
pub async fn retry<T, F, Fut>(mut op: F) -> SchedResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SchedResult<T>>,
{
    let mut interval = Duration::from_millis(RETRY_BASE_INTERVAL_MS);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < RETRY_ATTEMPTS => {
                debug!(
                    "第 {} 次尝试失败, {}ms 后重试: {}",
                    attempt,
                    interval.as_millis(),
                    err
                );
                tokio::time::sleep(jittered(interval)).await;
                interval = interval.mul_f64(RETRY_BACKOFF_MULTIPLIER);
            }
            Err(err) => return Err(err),
        }
    }
}

fn jittered(interval: Duration) -> Duration {
    let factor = rand::rng().random_range(0.0..RETRY_JITTER_FACTOR);
    interval.mul_f64(1.0 + factor)
}
