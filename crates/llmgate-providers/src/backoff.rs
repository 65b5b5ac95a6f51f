//! Exponential backoff around upstream calls.
//!
//! Only transport failures whose HTTP status is in the retryable set are
//! retried. Every retry and the final give-up emit a structured event so
//! operators can watch rate-limit pressure per provider.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use llmgate_core::config::RetrySettings;
use llmgate_core::DispatchError;

// ─────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────

/// Retry policy, fixed at dispatcher construction.
#[derive(Clone, Debug, PartialEq)]
pub struct BackoffPolicy {
    pub retryable_status_codes: Vec<u16>,
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for BackoffPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            retryable_status_codes: settings.retryable_status_codes.clone(),
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            exponential_base: settings.exponential_base,
            jitter: settings.jitter,
        }
    }
}

/// Next sleep duration: `current * base * (1 + sample)` with jitter,
/// `current * base` without. `sample` is drawn from `[0, 1)`.
///
/// Saturates at `Duration::MAX` instead of overflowing.
pub fn next_delay(current: Duration, base: f64, jitter: bool, sample: f64) -> Duration {
    let factor = base * (1.0 + if jitter { sample } else { 0.0 });
    Duration::try_from_secs_f64(current.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

// ─────────────────────────────────────────────
// Executor
// ─────────────────────────────────────────────

/// Per-invocation retry bookkeeping. Never shared between calls.
struct RetryState {
    retries: u32,
    delay: Duration,
}

/// Runs an upstream call under a [`BackoffPolicy`].
#[derive(Clone, Debug, Default)]
pub struct BackoffExecutor {
    policy: BackoffPolicy,
}

impl BackoffExecutor {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Invoke `work` until it succeeds, fails permanently, retries run out,
    /// or `cancel` fires.
    ///
    /// Gives `max_retries + 1` attempts in total before returning
    /// [`DispatchError::RateLimitExceeded`]. Cancellation is honored both
    /// during an attempt and during the sleep between attempts.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut work: F) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DispatchError>>,
    {
        let mut state = RetryState {
            retries: 0,
            delay: self.policy.initial_delay,
        };

        loop {
            if cancel.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                result = work() => result,
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable(&self.policy.retryable_status_codes) {
                match &err {
                    DispatchError::Transport { status, .. } => {
                        warn!(
                            event = "llm_non_retryable_error",
                            status = *status,
                            error = %err,
                            "Upstream call failed with non-retryable status"
                        );
                    }
                    DispatchError::Cancelled => {}
                    other => {
                        error!(
                            event = "llm_unexpected_error",
                            error_type = other.kind(),
                            error = %other,
                            "Upstream call failed"
                        );
                    }
                }
                return Err(err);
            }

            state.retries += 1;
            if state.retries > self.policy.max_retries {
                error!(
                    event = "llm_max_retries_exceeded",
                    max_retries = self.policy.max_retries,
                    status = ?err.status(),
                    "Giving up after repeated rate limiting"
                );
                return Err(DispatchError::RateLimitExceeded {
                    max_retries: self.policy.max_retries,
                });
            }

            let sample: f64 = rand::thread_rng().gen();
            state.delay = next_delay(
                state.delay,
                self.policy.exponential_base,
                self.policy.jitter,
                sample,
            );

            warn!(
                event = "llm_retry_attempt",
                attempt = state.retries,
                max_retries = self.policy.max_retries,
                delay_ms = state.delay.as_millis() as u64,
                status = ?err.status(),
                error_type = err.kind(),
                "Retryable upstream error, backing off"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DispatchError::Cancelled),
                _ = tokio::time::sleep(state.delay) => {}
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy {
            retryable_status_codes: vec![429],
            max_retries,
            initial_delay: Duration::from_secs(1),
            exponential_base: 2.0,
            jitter: false,
        }
    }

    fn rate_limited() -> DispatchError {
        DispatchError::Transport {
            status: 429,
            body: "rate limited".into(),
        }
    }

    #[test]
    fn test_next_delay_without_jitter() {
        let d = next_delay(Duration::from_secs(1), 2.0, false, 0.9);
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn test_next_delay_with_jitter_bounds() {
        let low = next_delay(Duration::from_secs(1), 2.0, true, 0.0);
        let high = next_delay(Duration::from_secs(1), 2.0, true, 0.999);
        assert_eq!(low, Duration::from_secs(2));
        assert!(high > Duration::from_millis(3990) && high < Duration::from_secs(4));
    }

    #[test]
    fn test_next_delay_saturates() {
        assert_eq!(next_delay(Duration::MAX, 2.0, false, 0.0), Duration::MAX);
    }

    #[test]
    fn test_policy_from_settings() {
        let p = BackoffPolicy::default();
        assert_eq!(p.max_retries, 20);
        assert_eq!(p.initial_delay, Duration::from_secs(1));
        assert_eq!(p.retryable_status_codes, vec![429]);
        assert!(p.jitter);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_rate_limits() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = BackoffExecutor::new(policy(5));
        let counter = calls.clone();

        let result = executor
            .run(&CancellationToken::new(), move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(rate_limited())
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
    async fn test_gives_up_after_max_retries_plus_one_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = BackoffExecutor::new(policy(2));
        let counter = calls.clone();
        let started = tokio::time::Instant::now();

        let result: Result<(), _> = executor
            .run(&CancellationToken::new(), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(rate_limited())
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(DispatchError::RateLimitExceeded { max_retries: 2 })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Slept 2s then 4s between the three attempts.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(6) && elapsed < Duration::from_millis(6100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_status_is_returned_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = BackoffExecutor::new(policy(5));
        let counter = calls.clone();

        let result: Result<(), _> = executor
            .run(&CancellationToken::new(), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(DispatchError::Transport {
                        status: 500,
                        body: "boom".into(),
                    })
                }
            })
            .await;

        assert_eq!(result.unwrap_err().status(), Some(500));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = BackoffExecutor::new(policy(5));
        let counter = calls.clone();

        let result: Result<(), _> = executor
            .run(&CancellationToken::new(), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(DispatchError::Connection("reset".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(DispatchError::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_sleep() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = BackoffExecutor::new(policy(5));
        let counter = calls.clone();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = executor
            .run(&cancel, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(rate_limited())
                }
            })
            .await;

        assert!(matches!(result, Err(DispatchError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_never_calls() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = BackoffExecutor::new(policy(5));
        let counter = calls.clone();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = executor
            .run(&cancel, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(DispatchError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
