//! One retry helper shared by the broker client, the crawler's HTTP client,
//! and the indexer's embedding/reranker calls, instead of three ad-hoc
//! copies (§4.1, §4.5, §4.3 all specify "retried with exponential backoff").

use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Broker ops: short timeout with retry, ≥3 attempts (§4.1, §5).
    pub const fn broker() -> Self {
        Self::new(3, Duration::from_millis(200))
    }

    /// External embedding/rerank calls: 60s timeout, 3 retries, exponential
    /// 1-10s (§5).
    pub const fn external_service() -> Self {
        Self::new(3, Duration::from_secs(1))
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt.saturating_sub(1))
    }
}

/// Run `op` up to `policy.max_attempts` times, doubling the delay between
/// attempts. Returns the last error if every attempt fails.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(attempt, %e, delay_ms = delay.as_millis() as u64, "retrying after transient error");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result: Result<u32, &str> = with_retry(policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result: Result<u32, &str> = with_retry(policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err("always fails") }
        })
        .await;

        assert_eq!(result, Err("always fails"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
