//! Gateway configuration

use crate::auth::Role;
use crate::fingerprint::Disposition;
use matte_stego::{CarrierFormat, max_capacity};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Gateway configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// API keys and the role each one selects
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,

    /// Covert tunnel configuration
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Legitimate background-removal backend
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Outer response shape shared by both paths
    #[serde(default)]
    pub fingerprint: FingerprintConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl GatewayConfig {
    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the gateway cannot serve correctly
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for cred in &self.credentials {
            if cred.key.is_empty() {
                return Err(ConfigError::Invalid("credential key is empty".into()));
            }
            if !seen.insert(cred.key.as_str()) {
                return Err(ConfigError::Invalid("duplicate credential key".into()));
            }
        }

        let has_covert = self.credentials.iter().any(|c| c.role == Role::Covert);
        let has_secret = self.tunnel.secret.as_deref().is_some_and(|s| !s.is_empty());
        if has_covert && !has_secret {
            return Err(ConfigError::Invalid(
                "covert credential configured without tunnel.secret".into(),
            ));
        }

        if self.tunnel.upstream_timeout_secs == 0 || self.pipeline.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }

        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("server.max_upload_bytes must be non-zero".into()));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Largest accepted request body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind() -> SocketAddr {
    "0.0.0.0:8000".parse().unwrap()
}

fn default_max_upload_bytes() -> usize {
    2 * 1024 * 1024 // 2MB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// One API key
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    pub key: String,
    pub role: Role,
}

/// Covert tunnel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    /// Shared secret for the carrier codec
    #[serde(default)]
    pub secret: Option<String>,

    /// Container for carriers and for the outer response
    #[serde(default)]
    pub carrier_format: CarrierFormat,

    /// Upstream fetch timeout in seconds
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,

    /// Largest upstream body relayed back
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,

    /// Hosts the tunnel may reach; empty means any
    #[serde(default)]
    pub allowed_hosts: Vec<String>,

    /// User-Agent sent to tunnel targets
    #[serde(default = "default_tunnel_user_agent")]
    pub user_agent: String,
}

fn default_upstream_timeout() -> u64 {
    25
}

fn default_max_response_bytes() -> usize {
    // room for a status line inside the largest carrier
    max_capacity() - 64
}

fn default_tunnel_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string()
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            secret: None,
            carrier_format: CarrierFormat::default(),
            upstream_timeout_secs: default_upstream_timeout(),
            max_response_bytes: default_max_response_bytes(),
            allowed_hosts: Vec::new(),
            user_agent: default_tunnel_user_agent(),
        }
    }
}

/// Legitimate pipeline backend
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Full URL of the backend removal endpoint
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Key used to sign backend requests; unsigned when absent
    #[serde(default)]
    pub api_key: Option<String>,

    /// Backend timeout in seconds
    #[serde(default = "default_pipeline_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_pipeline_user_agent")]
    pub user_agent: String,
}

fn default_backend_url() -> String {
    "http://127.0.0.1:9000/api/remove-background".to_string()
}

fn default_pipeline_timeout() -> u64 {
    90
}

fn default_pipeline_user_agent() -> String {
    "matte".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            api_key: None,
            timeout_secs: default_pipeline_timeout(),
            user_agent: default_pipeline_user_agent(),
        }
    }
}

/// Outer response properties
#[derive(Debug, Clone, Deserialize)]
pub struct FingerprintConfig {
    /// `Server` header value
    #[serde(default = "default_server_header")]
    pub server: String,

    #[serde(default)]
    pub disposition: Disposition,

    /// Appended to the upload's file stem in `Content-Disposition`
    #[serde(default = "default_filename_suffix")]
    pub filename_suffix: String,

    /// Send bodies with `Transfer-Encoding: chunked` instead of `Content-Length`
    #[serde(default)]
    pub chunked: bool,

    /// Status the pipeline uses for images it cannot process
    #[serde(default = "default_reject_status")]
    pub reject_status: u16,

    /// Message the pipeline uses for images it cannot process
    #[serde(default = "default_reject_message")]
    pub reject_message: String,
}

fn default_server_header() -> String {
    "uvicorn".to_string()
}

fn default_filename_suffix() -> String {
    "_no_bg".to_string()
}

fn default_reject_status() -> u16 {
    422
}

fn default_reject_message() -> String {
    "Could not process image".to_string()
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            server: default_server_header(),
            disposition: Disposition::default(),
            filename_suffix: default_filename_suffix(),
            chunked: false,
            reject_status: default_reject_status(),
            reject_message: default_reject_message(),
        }
    }
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// Prometheus metrics bind address
    #[serde(default = "default_prometheus_bind")]
    pub prometheus_bind: SocketAddr,

    /// Enable Prometheus
    #[serde(default)]
    pub prometheus_enabled: bool,
}

fn default_prometheus_bind() -> SocketAddr {
    "127.0.0.1:9090".parse().unwrap()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_bind: default_prometheus_bind(),
            prometheus_enabled: false,
        }
    }
}
