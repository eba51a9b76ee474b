// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retry with exponential backoff.
//!
//! Only pulls are retried, and only within a single sync run. Pushes are
//! never retried here: a failed push waits for the next edit of its key.
//!
//! # Example
//!
//! ```
//! use backup_sync::RetryConfig;
//!
//! let pull = RetryConfig::pull();
//! assert_eq!(pull.max_attempts, 3);
//!
//! let once = RetryConfig::none();
//! assert_eq!(once.max_attempts, 1);
//! ```

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts including the first one
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::pull()
    }
}

impl RetryConfig {
    /// Quick retry for pulls during a sync run.
    #[must_use]
    pub fn pull() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Single attempt.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Run `operation` until it succeeds, `should_retry` refuses the error, or
/// the attempt budget is spent. The last error is returned.
pub async fn retry<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;
    let max_attempts = config.max_attempts.max(1);

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!(operation = operation_name, retries = attempts, "Operation succeeded after retry");
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= max_attempts || !should_retry(&err) {
                    return Err(err);
                }

                warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max_attempts,
                    error = %err,
                    next_delay = ?delay,
                    "Operation failed, retrying"
                );

                sleep(delay).await;
                delay = delay.mul_f64(config.factor).min(config.max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn transient(e: &RemoteError) -> bool {
        matches!(e, RemoteError::Unreachable(_))
    }

    #[tokio::test]
    async fn test_first_success_is_returned() {
        let result: Result<i32, RemoteError> =
            retry("pull", &RetryConfig::test(), transient, || async { Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let result: Result<&str, RemoteError> = retry("pull", &RetryConfig::test(), transient, || async move {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(RemoteError::Unreachable("reset".into())),
                _ => Ok("envelope"),
            }
        })
        .await;

        assert_eq!(result.unwrap(), "envelope");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_last_error_after_budget_spent() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let result: Result<(), RemoteError> = retry("pull", &RetryConfig::test(), transient, || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Unreachable(format!("attempt {}", n)))
        })
        .await;

        assert_eq!(result.unwrap_err(), RemoteError::Unreachable("attempt 2".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_refused_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;

        let result: Result<(), RemoteError> = retry("pull", &RetryConfig::test(), transient, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Rejected {
                status: 404,
                reason: "gone".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(RemoteError::Rejected { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_none_makes_a_single_attempt() {
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let _: Result<(), RemoteError> = retry("pull", &RetryConfig::none(), transient, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RemoteError::Unreachable("down".into()))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_then_caps() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(150),
            factor: 4.0,
            max_attempts: 3,
        };
        let started = tokio::time::Instant::now();

        let _: Result<(), RemoteError> = retry("pull", &config, transient, || async {
            Err(RemoteError::Unreachable("down".into()))
        })
        .await;

        // 100ms, then 400ms capped to 150ms
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(250));
        assert!(waited < Duration::from_millis(300));
    }

    #[test]
    fn test_deserializes_from_millis() {
        let config: RetryConfig = serde_json::from_str(
            r#"{"initial_delay": 50, "max_delay": 400, "factor": 2.0, "max_attempts": 4}"#,
        )
        .unwrap();
        assert_eq!(config.initial_delay, Duration::from_millis(50));
        assert_eq!(config.max_attempts, 4);
    }
}
