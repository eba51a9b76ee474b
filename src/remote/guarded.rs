// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit-breaker wrapper for any [`RemoteBackup`].
//!
//! While the circuit is open every call fails fast with
//! [`RemoteError::Unreachable`], so the orchestrator treats a tripped
//! breaker exactly like a dead network.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{BackupStatus, RemoteBackup, RemoteError};
use crate::config::SyncConfig;
use crate::metrics::{self, LatencyTimer};
use crate::record::{BackupEnvelope, Timestamp};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};

pub struct GuardedBackup<R> {
    inner: R,
    breaker: CircuitBreaker,
}

impl<R: RemoteBackup> GuardedBackup<R> {
    pub fn new(inner: R, config: CircuitConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new("backup", config),
        }
    }

    pub fn from_config(inner: R, config: &SyncConfig) -> Self {
        Self::new(
            inner,
            CircuitConfig {
                window: config.circuit_window,
                recovery_timeout: Duration::from_millis(config.circuit_recovery_ms),
                ..CircuitConfig::default()
            },
        )
    }

    #[must_use]
    pub fn inner(&self) -> &R {
        &self.inner
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn guarded<T, F, Fut>(&self, operation: &'static str, f: F) -> Result<T, RemoteError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, RemoteError>>,
    {
        let _timer = LatencyTimer::new(operation);
        let result = match self.breaker.call(f).await {
            Ok(value) => Ok(value),
            Err(CircuitError::Rejected) => Err(RemoteError::Unreachable("circuit open".to_string())),
            Err(CircuitError::Inner(e)) => Err(e),
        };
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_remote_call(operation, outcome);
        result
    }
}

#[async_trait]
impl<R: RemoteBackup> RemoteBackup for GuardedBackup<R> {
    async fn push(
        &self,
        user_id: &str,
        key: &str,
        value: &Value,
        modified_at: Timestamp,
    ) -> Result<Timestamp, RemoteError> {
        self.guarded("push", || self.inner.push(user_id, key, value, modified_at))
            .await
    }

    async fn pull(&self, user_id: &str, key: &str) -> Result<Option<BackupEnvelope>, RemoteError> {
        self.guarded("pull", || self.inner.pull(user_id, key)).await
    }

    async fn purge(&self, user_id: &str) -> Result<u64, RemoteError> {
        self.guarded("purge", || self.inner.purge(user_id)).await
    }

    async fn status(&self) -> Result<BackupStatus, RemoteError> {
        self.guarded("status", || self.inner.status()).await
    }
}
