// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP client for the backup service.
//!
//! Routes:
//!
//! ```text
//! PUT    {base}/backups/{user}/{key}   body: envelope     -> {"modifiedAt": n}
//! GET    {base}/backups/{user}/{key}                      -> envelope | 404
//! DELETE {base}/backups/{user}                            -> {"deleted": n}
//! GET    {base}/status                                    -> BackupStatus
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{validate_envelope, BackupStatus, RemoteBackup, RemoteError};
use crate::config::SyncConfig;
use crate::record::{BackupEnvelope, Timestamp};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushAck {
    modified_at: Timestamp,
}

#[derive(Debug, Deserialize)]
struct PurgeAck {
    #[serde(default)]
    deleted: u64,
}

pub struct HttpBackupClient {
    client: Client,
    base: Url,
    bearer_token: Option<String>,
}

impl HttpBackupClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base = Url::parse(base_url)
            .map_err(|e| RemoteError::Unreachable(format!("invalid backup URL '{}': {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::Unreachable(format!(
                "backup URL '{}' cannot carry a path",
                base_url
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Unreachable(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base,
            bearer_token: None,
        })
    }

    /// Build from config; `None` when no remote URL is configured.
    pub fn from_config(config: &SyncConfig) -> Option<Result<Self, RemoteError>> {
        config.remote_url.as_deref().map(|url| {
            Self::new(url, Duration::from_millis(config.request_timeout_ms)).map(|client| {
                match &config.remote_token {
                    Some(token) => client.with_bearer_token(token.clone()),
                    None => client,
                }
            })
        })
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // cannot_be_a_base was rejected in new()
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        builder
            .send()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))
    }

    async fn rejected(response: reqwest::Response) -> RemoteError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let reason = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            body
        };
        RemoteError::Rejected {
            status: status.as_u16(),
            reason,
        }
    }
}

#[async_trait]
impl RemoteBackup for HttpBackupClient {
    async fn push(
        &self,
        user_id: &str,
        key: &str,
        value: &Value,
        modified_at: Timestamp,
    ) -> Result<Timestamp, RemoteError> {
        let url = self.endpoint(&["backups", user_id, key]);
        let envelope = BackupEnvelope::new(user_id, key, value.clone(), modified_at);
        let response = self
            .send(self.request(reqwest::Method::PUT, url).json(&envelope))
            .await?;

        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }
        let accepted = match response.json::<PushAck>().await {
            Ok(ack) => ack.modified_at,
            Err(e) => {
                debug!(key, error = %e, "Push acknowledged without timestamp");
                modified_at
            }
        };
        Ok(accepted)
    }

    async fn pull(&self, user_id: &str, key: &str) -> Result<Option<BackupEnvelope>, RemoteError> {
        let url = self.endpoint(&["backups", user_id, key]);
        let response = self.send(self.request(reqwest::Method::GET, url)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
        let envelope: BackupEnvelope =
            serde_json::from_str(&body).map_err(|e| RemoteError::MalformedEnvelope {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        validate_envelope(envelope, user_id, key).map(Some)
    }

    async fn purge(&self, user_id: &str) -> Result<u64, RemoteError> {
        let url = self.endpoint(&["backups", user_id]);
        let response = self.send(self.request(reqwest::Method::DELETE, url)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }
        Ok(response.json::<PurgeAck>().await.map(|a| a.deleted).unwrap_or(0))
    }

    async fn status(&self) -> Result<BackupStatus, RemoteError> {
        let url = self.endpoint(&["status"]);
        let response = self.send(self.request(reqwest::Method::GET, url)).await?;

        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }
        response
            .json::<BackupStatus>()
            .await
            .map_err(|e| RemoteError::Rejected {
                status: 200,
                reason: format!("unreadable status document: {}", e),
            })
    }
}
