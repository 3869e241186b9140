//! Client configuration

use crate::ClientError;
use matte_stego::CarrierFormat;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Tunnel client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Gateway base URL, e.g. `https://matte.example`
    pub gateway: String,

    /// API key sent as `X-API-Key`
    pub api_key: String,

    /// Shared tunnel secret; only needed for `fetch`
    #[serde(default)]
    pub secret: Option<String>,

    #[serde(default)]
    pub carrier_format: CarrierFormat,

    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Retries after a 503 before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff step; doubles per retry
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Backoff ceiling
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Gateway upload cap; carriers that would exceed it are not sent
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_timeout() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_retry_max_ms() -> u64 {
    5000
}

fn default_max_upload_bytes() -> usize {
    2 * 1024 * 1024
}

impl ClientConfig {
    pub fn new(gateway: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            gateway: gateway.into(),
            api_key: api_key.into(),
            secret: None,
            carrier_format: CarrierFormat::default(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ClientError::Config(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// `min(base * 2^attempt, max)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self.retry_base_ms.saturating_mul(factor).min(self.retry_max_ms);
        Duration::from_millis(ms)
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/remove-background", self.gateway.trim_end_matches('/'))
    }
}
