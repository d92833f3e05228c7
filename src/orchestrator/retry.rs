//! Retry combinator (§4.7): exponential-with-bounded-jitter and full-jitter backoff
//! strategies for operations designated retryable (image pull, `compose up`, transient
//! health probes).

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{OrchestratorError, Result};

/// Backoff strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// `delay' = min(max_delay, delay*2) ± U(0, jitter_ms)/1000`.
    Exp,
    /// `U(0, min(max_delay, base*2^attempt))`.
    FullJitter,
}

/// Retry knobs as named in the design.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts beyond the first.
    pub retries: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling on any single computed delay.
    pub max_delay: Duration,
    /// Jitter budget in milliseconds (used only by `Strategy::Exp`).
    pub jitter_ms: u64,
    /// Backoff strategy.
    pub strategy: Strategy,
    /// If set, only these exit codes are treated as retryable regardless of
    /// `is_retryable()`; `None` defers entirely to the error's own classification.
    pub retry_on_codes: Option<Vec<i32>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_ms: 250,
            strategy: Strategy::Exp,
            retry_on_codes: None,
        }
    }
}

const DELAY_FLOOR: Duration = Duration::from_millis(100);

fn compute_delay(policy: &RetryPolicy, attempt: u32, previous: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let delay = match policy.strategy {
        Strategy::Exp => {
            let doubled = previous.saturating_mul(2);
            let bounded = std::cmp::min(policy.max_delay, if attempt == 0 { policy.base_delay } else { doubled });
            let jitter_signed: i64 = if policy.jitter_ms == 0 {
                0
            } else {
                rng.gen_range(0..=(policy.jitter_ms as i64 * 2)) - policy.jitter_ms as i64
            };
            let bounded_ms = bounded.as_millis() as i64;
            let jittered_ms = (bounded_ms + jitter_signed).max(0);
            Duration::from_millis(jittered_ms as u64)
        }
        Strategy::FullJitter => {
            let cap = std::cmp::min(
                policy.max_delay,
                policy.base_delay.saturating_mul(2u32.saturating_pow(attempt)),
            );
            let cap_ms = cap.as_millis() as u64;
            let chosen = if cap_ms == 0 { 0 } else { rng.gen_range(0..=cap_ms) };
            Duration::from_millis(chosen)
        }
    };
    std::cmp::max(delay, DELAY_FLOOR)
}

fn should_retry(policy: &RetryPolicy, error: &OrchestratorError) -> bool {
    if let Some(codes) = &policy.retry_on_codes {
        if let OrchestratorError::TransientOperation { exit_code, .. }
        | OrchestratorError::PermanentOperation { exit_code, .. } = error
        {
            return codes.contains(exit_code);
        }
        return false;
    }
    error.is_retryable()
}

/// Run `operation` under the given policy, retrying on classified-retryable failures
/// until `retries` is exhausted.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, step: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut previous = policy.base_delay;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= policy.retries || !should_retry(policy, &error) {
                    return Err(error);
                }
                let delay = compute_delay(policy, attempt, previous);
                previous = delay;
                warn!(
                    step,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            retries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_ms: 1,
            strategy: Strategy::Exp,
            retry_on_codes: None,
        };
        let result = retry(&policy, "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(OrchestratorError::transient("cmd", 1, "", "boom"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: Result<()> = retry(&policy, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(OrchestratorError::invalid_input("nope")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy {
            retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_ms: 0,
            strategy: Strategy::FullJitter,
            retry_on_codes: None,
        };
        let result: Result<()> = retry(&policy, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(OrchestratorError::transient("cmd", 1, "", "boom")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delay_never_negative_or_below_floor() {
        let policy = RetryPolicy {
            retries: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter_ms: 1000,
            strategy: Strategy::Exp,
            retry_on_codes: None,
        };
        for attempt in 0..5 {
            let delay = compute_delay(&policy, attempt, Duration::from_millis(1));
            assert!(delay >= DELAY_FLOOR);
        }
    }

    #[test]
    fn retry_on_codes_filters_by_exit_code() {
        let policy = RetryPolicy {
            retry_on_codes: Some(vec![42]),
            ..RetryPolicy::default()
        };
        assert!(should_retry(&policy, &OrchestratorError::transient("cmd", 42, "", "")));
        assert!(!should_retry(&policy, &OrchestratorError::transient("cmd", 7, "", "")));
    }
}
