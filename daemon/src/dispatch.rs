//! Dispatch gateway
//!
//! `AUTHENTICATE -> {LEGITIMATE | COVERT} -> RESPOND`. Both branches end in
//! `Gateway::respond`, which only ever builds responses through the shared
//! `Fingerprint`.

use crate::auth::{CredentialTable, Role};
use crate::config::{ConfigError, GatewayConfig};
use crate::executor::{ExecutorConfig, ExecutorError, HttpExecutor, Upstream};
use crate::fingerprint::{Fingerprint, OuterResponse, ResponseProfile};
use crate::metrics::METRICS;
use crate::pipeline::{BackgroundRemover, PipelineError, RemoteRemover, Upload};
use axum::http::StatusCode;
use bytes::Bytes;
use matte_crypto::CarrierKey;
use matte_protocol::{FramingError, ResponseDescriptor, StatusLine, parse_request};
use matte_stego::{Codec, SizeHint, StegoError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Stego(#[from] StegoError),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("Codec task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl DispatchError {
    /// Label for the covert failure counter
    fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Stego(StegoError::NotACarrier) => "not_a_carrier",
            Self::Stego(StegoError::CapacityExceeded { .. }) => "capacity_exceeded",
            Self::Framing(FramingError::MalformedRequest(_)) => "malformed_request",
            Self::Pipeline(_) => "pipeline",
            _ => "internal",
        }
    }
}

/// Everything a gateway needs, fixed at start-up
pub struct GatewayState {
    pub credentials: CredentialTable,
    /// Absent when no tunnel secret is configured
    pub codec: Option<Codec>,
    pub fingerprint: Fingerprint,
    pub pipeline: Arc<dyn BackgroundRemover>,
    pub upstream: Arc<dyn Upstream>,
}

impl GatewayState {
    /// Build from configuration with caller-supplied backends
    pub fn from_config(
        config: &GatewayConfig,
        pipeline: Arc<dyn BackgroundRemover>,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let credentials = CredentialTable::from_config(&config.credentials)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let format = config.tunnel.carrier_format;
        let codec = match config.tunnel.secret.as_deref() {
            Some(secret) if !secret.is_empty() => {
                let key = CarrierKey::from_secret(secret.as_bytes())
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
                Some(Codec::new(key, format))
            }
            _ => None,
        };

        Ok(Self {
            credentials,
            codec,
            fingerprint: Fingerprint::new(ResponseProfile::from_config(
                &config.fingerprint,
                format,
            )),
            pipeline,
            upstream,
        })
    }
}

/// The path selected by a credential
pub enum Session<'g> {
    Legitimate {
        pipeline: &'g dyn BackgroundRemover,
    },
    Covert {
        codec: &'g Codec,
        upstream: &'g dyn Upstream,
    },
}

impl Session<'_> {
    pub fn role(&self) -> Role {
        match self {
            Self::Legitimate { .. } => Role::Legitimate,
            Self::Covert { .. } => Role::Covert,
        }
    }
}

pub struct Gateway {
    state: GatewayState,
}

impl Gateway {
    pub fn new(state: GatewayState) -> Self {
        Self { state }
    }

    /// Build with the HTTP pipeline client and the HTTP executor
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let pipeline = RemoteRemover::new(&config.pipeline)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let upstream = HttpExecutor::new(ExecutorConfig {
            timeout: Duration::from_secs(config.tunnel.upstream_timeout_secs),
            max_response_bytes: config.tunnel.max_response_bytes,
            allowed_hosts: config.tunnel.allowed_hosts.clone(),
            user_agent: config.tunnel.user_agent.clone(),
        })
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let state = GatewayState::from_config(config, Arc::new(pipeline), Arc::new(upstream))?;
        Ok(Self::new(state))
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.state.fingerprint
    }

    pub fn credentials(&self) -> &CredentialTable {
        &self.state.credentials
    }

    pub fn pipeline(&self) -> &dyn BackgroundRemover {
        self.state.pipeline.as_ref()
    }

    /// Resolve the presented API key to a session
    pub fn authenticate(&self, api_key: Option<&str>) -> Result<Session<'_>, DispatchError> {
        let role = api_key
            .and_then(|key| self.state.credentials.lookup(key))
            .ok_or(DispatchError::Unauthorized)?;

        match role {
            Role::Legitimate => Ok(Session::Legitimate {
                pipeline: self.state.pipeline.as_ref(),
            }),
            Role::Covert => match &self.state.codec {
                Some(codec) => Ok(Session::Covert {
                    codec,
                    upstream: self.state.upstream.as_ref(),
                }),
                None => {
                    warn!("Covert credential presented but no tunnel secret is loaded");
                    Err(DispatchError::Unauthorized)
                }
            },
        }
    }

    /// Authenticate, run the selected path and build the outer response
    pub async fn dispatch(&self, api_key: Option<&str>, upload: Upload) -> OuterResponse {
        match self.authenticate(api_key) {
            Ok(session) => self.serve(session, upload).await,
            Err(e) => self.unauthorized(&e),
        }
    }

    /// The 401 answer for a failed `authenticate`
    pub fn unauthorized(&self, error: &DispatchError) -> OuterResponse {
        METRICS.auth_failures.inc();
        debug!("Authentication failed: {}", error);
        self.state
            .fingerprint
            .error(StatusCode::UNAUTHORIZED, "Invalid API key")
    }

    /// Run an authenticated session
    pub async fn serve(&self, session: Session<'_>, upload: Upload) -> OuterResponse {
        METRICS
            .requests
            .with_label_values(&[session.role().as_str()])
            .inc();

        let outcome = match session {
            Session::Legitimate { pipeline } => pipeline
                .remove(&upload)
                .await
                .map_err(DispatchError::from),
            Session::Covert { codec, upstream } => {
                let result = tunnel(codec, upstream, upload.bytes.clone()).await;
                if let Err(e) = &result {
                    METRICS.covert_failures.with_label_values(&[e.kind()]).inc();
                }
                result
            }
        };

        self.respond(outcome, upload.filename.as_deref())
    }

    /// Map a path outcome onto the outer response
    pub fn respond(
        &self,
        outcome: Result<Bytes, DispatchError>,
        upload_name: Option<&str>,
    ) -> OuterResponse {
        let fingerprint = &self.state.fingerprint;

        let error = match outcome {
            Ok(image) => return fingerprint.success(upload_name, image),
            Err(e) => e,
        };

        debug!("Request failed: {}", error);
        match &error {
            DispatchError::Unauthorized => self.unauthorized(&error),
            DispatchError::Stego(StegoError::NotACarrier)
            | DispatchError::Framing(FramingError::MalformedRequest(_)) => fingerprint.rejected(),
            DispatchError::Pipeline(PipelineError::Unavailable) => fingerprint.error(
                StatusCode::SERVICE_UNAVAILABLE,
                "Model is warming up, please retry",
            ),
            DispatchError::Pipeline(PipelineError::Rejected { status, message }) => {
                let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                fingerprint.error(status, message)
            }
            DispatchError::Pipeline(PipelineError::Unreachable {
                timed_out: true, ..
            }) => fingerprint.error(StatusCode::GATEWAY_TIMEOUT, "Request timeout"),
            DispatchError::Pipeline(PipelineError::Unreachable { .. }) => {
                fingerprint.error(StatusCode::BAD_GATEWAY, "Failed to connect to backend")
            }
            _ => fingerprint.error(StatusCode::INTERNAL_SERVER_ERROR, "Processing error"),
        }
    }
}

/// decode -> parse_request -> fetch -> encode_response -> encode
async fn tunnel(
    codec: &Codec,
    upstream: &dyn Upstream,
    carrier: Bytes,
) -> Result<Bytes, DispatchError> {
    let decoder = codec.clone();
    let payload = tokio::task::spawn_blocking(move || decoder.decode(&carrier)).await??;
    let request = parse_request(&payload)?;
    drop(payload);
    debug!("Tunnel {} {}", request.method, request.url);

    let timer = METRICS.upstream_duration.start_timer();
    let fetched = upstream.fetch(&request).await;
    timer.observe_duration();

    let descriptor = match fetched {
        Ok(descriptor) => descriptor,
        Err(e) => synthesize(e)?,
    };

    match embed(codec, descriptor.to_bytes()).await {
        Err(DispatchError::Stego(StegoError::CapacityExceeded { needed, capacity })) => {
            debug!("Reply of {} bytes exceeds carrier capacity {}", needed, capacity);
            let fallback = synthesize(ExecutorError::CapacityExceeded {
                size: needed,
                limit: capacity,
            })?;
            embed(codec, fallback.to_bytes()).await
        }
        other => other,
    }
}

async fn embed(codec: &Codec, reply: Vec<u8>) -> Result<Bytes, DispatchError> {
    let encoder = codec.clone();
    let carrier =
        tokio::task::spawn_blocking(move || encoder.encode(&reply, SizeHint::Auto)).await??;
    METRICS.carrier_size.observe(carrier.bytes.len() as f64);
    Ok(Bytes::from(carrier.into_bytes()))
}

/// Descriptor telling the far end why the fetch produced nothing
fn synthesize(error: ExecutorError) -> Result<ResponseDescriptor, DispatchError> {
    let (code, body): (u16, &'static [u8]) = match &error {
        ExecutorError::UpstreamUnreachable {
            timed_out: true, ..
        } => (504, b"upstream timed out"),
        ExecutorError::UpstreamUnreachable { .. } => (502, b"upstream unreachable"),
        ExecutorError::CapacityExceeded { .. } => (502, b"upstream response too large"),
        _ => return Err(error.into()),
    };
    debug!("Synthesizing {} descriptor: {}", code, error);

    let kind = match &error {
        ExecutorError::CapacityExceeded { .. } => "capacity_exceeded",
        _ => "upstream_unreachable",
    };
    METRICS.covert_failures.with_label_values(&[kind]).inc();

    Ok(ResponseDescriptor::new(
        StatusLine::canonical(code)?,
        Bytes::from_static(body),
    ))
}
