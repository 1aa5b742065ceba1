//! Retry with exponential backoff and jitter.
//!
//! Each failed attempt is classified; non-retryable errors and exhausted
//! budgets re-raise the last error unchanged. The backoff base delay comes
//! from the classification (60s for rate limits, 2s for network, ...), then
//! grows exponentially and is scaled by a jitter factor in `[0.5, 1.0)` to
//! avoid thundering herds.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::classify::ErrorClassifier;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Exponential backoff base.
    pub backoff_base: f64,
    /// Backoff ceiling in seconds.
    pub backoff_max_seconds: f64,
    /// Whether to scale delays by a random factor in `[0.5, 1.0)`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: 2.0,
            backoff_max_seconds: 60.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (1-based), given the
    /// classified base delay.
    pub fn backoff_delay(&self, attempt: u32, base_delay_seconds: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let mut delay = (base_delay_seconds * self.backoff_base.powi(exponent as i32))
            .min(self.backoff_max_seconds);
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..1.0);
            delay *= factor;
        }
        Duration::from_secs_f64(delay.max(0.0))
    }
}

/// Run `op` with retry. The closure receives the 1-based attempt number.
///
/// The last error is returned unchanged when the error is classified
/// non-retryable or the attempt budget is exhausted.
pub async fn execute_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    task_id: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(task_id, attempt, "task succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                let classified =
                    ErrorClassifier::classify(&err.to_string(), Default::default());

                if !classified.retryable {
                    tracing::error!(
                        task_id,
                        category = classified.category.as_str(),
                        error = %err,
                        "task failed with non-retryable error"
                    );
                    return Err(err);
                }
                if attempt >= policy.max_attempts {
                    tracing::error!(
                        task_id,
                        attempts = attempt,
                        category = classified.category.as_str(),
                        error = %err,
                        "task failed after exhausting retries"
                    );
                    return Err(err);
                }

                let delay = policy.backoff_delay(attempt, classified.retry_delay_seconds);
                tracing::warn!(
                    task_id,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    category = classified.category.as_str(),
                    "task failed, retrying"
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

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_base, 2.0);
        assert_eq!(policy.backoff_max_seconds, 60.0);
        assert!(policy.jitter);
    }

    #[test]
    fn backoff_grows_exponentially_up_to_ceiling() {
        let policy = no_jitter();
        assert_eq!(policy.backoff_delay(1, 2.0), Duration::from_secs_f64(2.0));
        assert_eq!(policy.backoff_delay(2, 2.0), Duration::from_secs_f64(4.0));
        assert_eq!(policy.backoff_delay(3, 2.0), Duration::from_secs_f64(8.0));
        // 60s ceiling
        assert_eq!(policy.backoff_delay(8, 2.0), Duration::from_secs_f64(60.0));
    }

    #[test]
    fn jitter_scales_into_half_to_full_range() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let delay = policy.backoff_delay(1, 10.0).as_secs_f64();
            assert!((5.0..10.0).contains(&delay), "delay {delay} out of range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<&str, String> =
            execute_with_retry(&no_jitter(), "task-1", |_attempt| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("connection reset".to_string())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            execute_with_retry(&no_jitter(), "task-2", |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("validation failed: bad payload".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            execute_with_retry(&no_jitter(), "task-3", |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("network unreachable".to_string()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "network unreachable");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
