//! Prometheus metrics

use crate::config::MonitoringConfig;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Global metrics registry
static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Process-wide metrics handle
pub static METRICS: LazyLock<Metrics> = LazyLock::new(Metrics::new);

/// Metrics struct
pub struct Metrics {
    // Counters
    pub requests: IntCounterVec,
    pub auth_failures: IntCounter,
    pub covert_failures: IntCounterVec,

    // Histograms
    pub upstream_duration: Histogram,
    pub carrier_size: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let requests = IntCounterVec::new(
            Opts::new("matte_requests_total", "Authenticated removal requests by role"),
            &["role"],
        )
        .unwrap();

        let auth_failures = IntCounter::with_opts(Opts::new(
            "matte_auth_failures_total",
            "Requests with a missing or unknown API key",
        ))
        .unwrap();

        let covert_failures = IntCounterVec::new(
            Opts::new("matte_covert_failures_total", "Covert path failures by kind"),
            &["kind"],
        )
        .unwrap();

        let upstream_duration = Histogram::with_opts(HistogramOpts::new(
            "matte_upstream_duration_seconds",
            "Tunnelled fetch duration in seconds",
        ))
        .unwrap();

        let carrier_size = Histogram::with_opts(
            HistogramOpts::new("matte_carrier_size_bytes", "Encoded carrier size in bytes")
                .buckets(vec![
                    1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0, 4194304.0,
                ]),
        )
        .unwrap();

        // Register metrics
        REGISTRY.register(Box::new(requests.clone())).ok();
        REGISTRY.register(Box::new(auth_failures.clone())).ok();
        REGISTRY.register(Box::new(covert_failures.clone())).ok();
        REGISTRY.register(Box::new(upstream_duration.clone())).ok();
        REGISTRY.register(Box::new(carrier_size.clone())).ok();

        Self {
            requests,
            auth_failures,
            covert_failures,
            upstream_duration,
            carrier_size,
        }
    }

    /// Render the registry in the Prometheus text format
    pub fn render() -> Vec<u8> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
            error!("Failed to encode metrics: {}", e);
        }
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics server
pub fn start_server(config: &MonitoringConfig) -> JoinHandle<()> {
    let bind = config.prometheus_bind;
    let enabled = config.prometheus_enabled;

    tokio::spawn(async move {
        if !enabled {
            info!("Prometheus metrics disabled");
            return;
        }

        use bytes::Bytes;
        use http_body_util::Full;
        use hyper::{Response, server::conn::http1, service::service_fn};
        use hyper_util::rt::TokioIo;

        let listener = match tokio::net::TcpListener::bind(bind).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind metrics server: {}", e);
                return;
            }
        };

        info!("Prometheus metrics server listening on {}", bind);
        LazyLock::force(&METRICS);

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(r) => r,
                Err(e) => {
                    error!("Metrics accept error: {}", e);
                    continue;
                }
            };

            let io = TokioIo::new(stream);

            tokio::spawn(async move {
                let service = service_fn(|_req| async {
                    let mut response = Response::new(Full::new(Bytes::from(Metrics::render())));
                    response.headers_mut().insert(
                        hyper::header::CONTENT_TYPE,
                        hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                    );
                    Ok::<_, std::convert::Infallible>(response)
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Metrics connection error: {}", e);
                }
            });
        }
    })
}
