// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker for the remote backup service, built on `recloser`.
//!
//! When the backup service keeps failing, the breaker opens and calls fail
//! fast without touching the network until the recovery window elapses.
//!
//! States:
//! - Closed: calls pass through, failures are counted over a sliding window
//! - Open: calls are rejected immediately
//! - HalfOpen: a few probe calls decide whether to close again

use recloser::{AsyncRecloser, Error as RecloserError, Recloser};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Error type for circuit-protected operations
#[derive(Debug, thiserror::Error)]
pub enum CircuitError<E> {
    /// The circuit breaker rejected the call (circuit is open)
    #[error("circuit breaker open, request rejected")]
    Rejected,

    /// The underlying operation failed
    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

impl<E> From<RecloserError<E>> for CircuitError<E> {
    fn from(err: RecloserError<E>) -> Self {
        match err {
            RecloserError::Rejected => CircuitError::Rejected,
            RecloserError::Inner(e) => CircuitError::Inner(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Failure ratio over the window that trips the breaker (0.0 - 1.0)
    pub error_rate: f32,
    /// Number of calls observed while closed before the rate is evaluated
    pub window: usize,
    /// Probe calls allowed while half-open
    pub half_open_probes: usize,
    /// How long to stay open before probing
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            error_rate: 0.5,
            window: 8,
            half_open_probes: 2,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitConfig {
    /// Fast trip and recovery for tests
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            error_rate: 0.5,
            window: 2,
            half_open_probes: 1,
            recovery_timeout: Duration::from_millis(50),
        }
    }
}

/// Point-in-time call counts for one breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitStats {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    /// Calls turned away without running while the circuit was open
    pub rejections: u64,
}

#[derive(Default)]
struct Counters {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

/// Named breaker guarding one remote dependency.
pub struct CircuitBreaker {
    name: String,
    recloser: AsyncRecloser,
    counters: Counters,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        let recloser = Recloser::custom()
            .error_rate(config.error_rate)
            .closed_len(config.window.max(1))
            .half_open_len(config.half_open_probes.max(1))
            .open_wait(config.recovery_timeout)
            .build();

        Self {
            name: name.into(),
            recloser: recloser.into(),
            counters: Counters::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the future built by `f` unless the circuit is open.
    ///
    /// While open, the future is dropped without being polled.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);

        let result = self.recloser.call(f()).await.map_err(CircuitError::from);
        let (counter, outcome) = match &result {
            Ok(_) => (&self.counters.successes, "success"),
            Err(CircuitError::Inner(_)) => {
                debug!(circuit = %self.name, "Call through backup circuit failed");
                (&self.counters.failures, "failure")
            }
            Err(CircuitError::Rejected) => {
                warn!(circuit = %self.name, "Backup circuit open, call skipped");
                (&self.counters.rejections, "rejected")
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_circuit_call(&self.name, outcome);
        result
    }

    #[must_use]
    pub fn stats(&self) -> CircuitStats {
        CircuitStats {
            calls: self.counters.calls.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
        }
    }
}
