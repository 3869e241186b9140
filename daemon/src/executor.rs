//! Outbound executor
//!
//! Performs the tunnelled fetch. Whatever the target answers, 4xx and 5xx
//! included, comes back as a `ResponseDescriptor`; only transport faults are
//! errors.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use matte_protocol::{FramingError, RequestDescriptor, ResponseDescriptor, StatusLine};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Request headers never forwarded to the target
const SKIPPED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Upstream unreachable: {reason}")]
    UpstreamUnreachable { reason: String, timed_out: bool },

    #[error("Upstream body of {size} bytes exceeds limit of {limit} bytes")]
    CapacityExceeded { size: usize, limit: usize },

    #[error("Upstream client setup failed: {0}")]
    Client(String),

    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// Something that can execute a tunnelled request
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, ExecutorError>;
}

/// Configuration for the HTTP executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Whole-request timeout, body included
    pub timeout: Duration,

    /// Largest upstream body accepted
    pub max_response_bytes: usize,

    /// Lowercased hosts the tunnel may reach; empty means any
    pub allowed_hosts: Vec<String>,

    pub user_agent: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(25),
            max_response_bytes: 1024 * 1024,
            allowed_hosts: Vec::new(),
            user_agent: "Mozilla/5.0".to_string(),
        }
    }
}

/// `reqwest`-backed executor
pub struct HttpExecutor {
    client: Client,
    config: ExecutorConfig,
}

impl HttpExecutor {
    pub fn new(mut config: ExecutorConfig) -> Result<Self, ExecutorError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ExecutorError::Client(e.to_string()))?;

        for host in config.allowed_hosts.iter_mut() {
            *host = host.to_ascii_lowercase();
        }

        Ok(Self { client, config })
    }

    fn is_allowed(&self, host: &str) -> bool {
        self.config.allowed_hosts.is_empty() || self.config.allowed_hosts.iter().any(|h| h == host)
    }
}

#[async_trait]
impl Upstream for HttpExecutor {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, ExecutorError> {
        let host = request.host();
        if !self.is_allowed(&host) {
            debug!("Refusing tunnel target host {}", host);
            return Ok(ResponseDescriptor::new(
                StatusLine::canonical(403)?,
                Bytes::from_static(b"target host not allowed"),
            ));
        }

        let mut builder = self.client.request(request.method.into(), request.url.clone());
        for (name, value) in &request.headers {
            if SKIPPED_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let mut response = builder.send().await.map_err(unreachable)?;
        let status = StatusLine::canonical(response.status().as_u16())?;

        let limit = self.config.max_response_bytes;
        if let Some(len) = response.content_length() {
            let size = usize::try_from(len).unwrap_or(usize::MAX);
            if size > limit {
                return Err(ExecutorError::CapacityExceeded { size, limit });
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(unreachable)? {
            if body.len() + chunk.len() > limit {
                return Err(ExecutorError::CapacityExceeded {
                    size: body.len() + chunk.len(),
                    limit,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Upstream answered {} with {} bytes", status, body.len());
        Ok(ResponseDescriptor::new(status, body.freeze()))
    }
}

fn unreachable(e: reqwest::Error) -> ExecutorError {
    ExecutorError::UpstreamUnreachable {
        timed_out: e.is_timeout(),
        reason: e.to_string(),
    }
}
