//! Legitimate background-removal pipeline
//!
//! The gateway never removes backgrounds itself. `RemoteRemover` forwards the
//! upload to the configured backend, signing each request with the pipeline
//! API key.

use crate::config::PipelineConfig;
use async_trait::async_trait;
use bytes::Bytes;
use matte_crypto::RequestSigner;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// One uploaded image, as received from the multipart `image` field
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Bytes,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl Upload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            filename: None,
            content_type: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Pipeline is warming up")]
    Unavailable,

    #[error("Pipeline rejected the image with {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Pipeline unreachable: {reason}")]
    Unreachable { reason: String, timed_out: bool },

    #[error("Pipeline setup failed: {0}")]
    Setup(String),
}

/// Genuine background removal
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// Returns the processed image bytes
    async fn remove(&self, upload: &Upload) -> Result<Bytes, PipelineError>;

    /// `Ok(true)` once the backend answers successfully
    async fn probe(&self) -> Result<bool, PipelineError>;
}

/// Forwards uploads to an HTTP backend
pub struct RemoteRemover {
    client: Client,
    backend_url: Url,
    signer: Option<RequestSigner>,
}

impl RemoteRemover {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let backend_url = Url::parse(&config.backend_url)
            .map_err(|e| PipelineError::Setup(format!("backend_url: {e}")))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PipelineError::Setup(e.to_string()))?;

        let signer = match config.api_key.as_deref() {
            Some(key) if !key.is_empty() => Some(
                RequestSigner::new(key).map_err(|e| PipelineError::Setup(e.to_string()))?,
            ),
            _ => {
                warn!("No pipeline api_key configured, backend requests are unsigned");
                None
            }
        };

        Ok(Self {
            client,
            backend_url,
            signer,
        })
    }
}

#[async_trait]
impl BackgroundRemover for RemoteRemover {
    async fn remove(&self, upload: &Upload) -> Result<Bytes, PipelineError> {
        let boundary = format!("----matte{}", uuid::Uuid::new_v4().simple());
        let body = multipart_body(&boundary, upload);

        let mut builder = self
            .client
            .post(self.backend_url.clone())
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            );
        if let Some(signer) = &self.signer {
            let signed = signer.sign(&body);
            for (name, value) in signed.header_pairs() {
                builder = builder.header(name, value);
            }
        }

        let response = builder.body(body).send().await.map_err(unreachable)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(unreachable)?;

        if status.is_success() {
            debug!("Pipeline returned {} bytes", bytes.len());
            return Ok(bytes);
        }
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(PipelineError::Unavailable);
        }

        Err(PipelineError::Rejected {
            status: status.as_u16(),
            message: error_message(status, &bytes),
        })
    }

    async fn probe(&self) -> Result<bool, PipelineError> {
        let origin = self.backend_url.origin().ascii_serialization();
        let response = self
            .client
            .get(origin)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(unreachable)?;
        Ok(response.status().is_success())
    }
}

/// Single-part `multipart/form-data` body with the upload as field `image`
fn multipart_body(boundary: &str, upload: &Upload) -> Vec<u8> {
    let filename = upload
        .filename
        .as_deref()
        .unwrap_or("image.png")
        .replace(['"', '\r', '\n'], "_");
    let content_type = upload
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");

    let mut body = Vec::with_capacity(upload.bytes.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(&upload.bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// The backend's `{"error": ...}` text, or the canonical reason
fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("detail"))
                .and_then(|e| e.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Error").to_string())
}

fn unreachable(e: reqwest::Error) -> PipelineError {
    PipelineError::Unreachable {
        timed_out: e.is_timeout(),
        reason: e.to_string(),
    }
}
