//! Automatic retry with exponential backoff and jitter.
//!
//! Retries transient completion errors (429, 5xx, network failures) with
//! randomized exponential backoff. Permanent errors (bad request, auth,
//! schema violations) fail on the first attempt.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::CompletionError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Initial delay, and the lower bound of every jittered delay.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential backoff).
    pub multiplier: f64,
    /// Whether to randomize delays to prevent thundering herd.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries. Uses sensible defaults.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Policy for plain text completions: 5 attempts, 0.1s initial, 10s cap.
    pub fn plain() -> Self {
        Self {
            max_retries: 4,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            ..Default::default()
        }
    }

    /// Policy for structured completions: 7 attempts, 0.1s initial, 20s cap.
    pub fn structured() -> Self {
        Self {
            max_retries: 6,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(20),
            ..Default::default()
        }
    }

    /// Total attempts this policy allows, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Uniform between the initial delay and the exponential ceiling.
            let floor = self.initial_delay.as_secs_f64().min(capped);
            let r: f64 = rand::random();
            Duration::from_secs_f64(floor + (capped - floor) * r)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Retry an async call with exponential backoff for transient errors.
///
/// `call` receives the zero-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    mut call: F,
) -> Result<T, CompletionError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CompletionError>>,
{
    let mut attempt = 0;
    loop {
        match call(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt < config.max_retries && e.is_transient() {
                    let delay = config.delay_for_attempt(attempt);
                    warn!(
                        "Transient API error (attempt {}/{}): {e}. Retrying in {delay:?}...",
                        attempt + 1,
                        config.max_attempts(),
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                } else {
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_config_no_retries() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.max_attempts(), 1);
    }

    #[test]
    fn presets_match_attempt_budgets() {
        assert_eq!(RetryConfig::plain().max_attempts(), 5);
        assert_eq!(RetryConfig::plain().max_delay, Duration::from_secs(10));
        assert_eq!(RetryConfig::structured().max_attempts(), 7);
        assert_eq!(RetryConfig::structured().max_delay, Duration::from_secs(20));
    }

    #[test]
    fn delay_increases_exponentially() {
        let config = RetryConfig {
            jitter: false,
            ..RetryConfig::with_retries(5)
        };
        let d0 = config.delay_for_attempt(0);
        let d1 = config.delay_for_attempt(1);
        let d2 = config.delay_for_attempt(2);

        assert!(d1 > d0, "d1={d1:?} should be > d0={d0:?}");
        assert!(d2 > d1, "d2={d2:?} should be > d1={d1:?}");
    }

    #[test]
    fn delay_capped_at_max() {
        let config = RetryConfig {
            jitter: false,
            max_delay: Duration::from_secs(2),
            ..RetryConfig::with_retries(10)
        };
        let d10 = config.delay_for_attempt(10);
        assert!(d10 <= Duration::from_secs(2));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let config = RetryConfig::plain();
        for attempt in 0..12 {
            let d = config.delay_for_attempt(attempt);
            assert!(d >= config.initial_delay, "attempt {attempt}: {d:?}");
            assert!(d <= config.max_delay, "attempt {attempt}: {d:?}");
        }
    }

    fn fast(retries: u32) -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::with_retries(retries)
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let calls = &AtomicU32::new(0);
        let result = retry_with_backoff(&fast(3), |_| async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CompletionError::from_status(503, "busy"))
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_immediately() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast(5), |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CompletionError::from_status(400, "bad request"))
        })
        .await;
        assert!(matches!(result, Err(CompletionError::Api { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let result: Result<(), _> = retry_with_backoff(&fast(2), |attempt| async move {
            Err(CompletionError::Network(format!("attempt {attempt} timed out")))
        })
        .await;
        match result {
            Err(CompletionError::Network(msg)) => assert!(msg.contains("attempt 2")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
