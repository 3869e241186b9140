//! Integration Test Harness
#![allow(dead_code)]
//!
//! Runs a gateway, a fake removal backend and a tunnel target in-process,
//! each on its own loopback listener.

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use matte_client::{ClientConfig, TunnelClient};
use matte_gateway::{Gateway, GatewayConfig, server};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;

pub const LEGIT_KEY: &str = "nyx1q2w3e4r5t6y7u8i9o0p";
pub const COVERT_KEY: &str = "ryuvxRDUQMlziaITv7CFaQS";
pub const SECRET: &str = "uc2Kz5hnQXiDroUhMs5UsoGML8ATWMMe";

/// What the fake backend returns for every photo
pub const PROCESSED: &[u8] = b"\x89PNG\r\n\x1a\nprocessed";

pub struct Harness {
    pub gateway_url: String,
    pub target_url: String,
    pub target_hits: Arc<AtomicUsize>,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(false).await
    }

    pub async fn start_with(chunked: bool) -> Self {
        let target_hits = Arc::new(AtomicUsize::new(0));
        let target = spawn(target_router(target_hits.clone())).await;
        let backend = spawn(backend_router()).await;

        let config = GatewayConfig::from_toml(&format!(
            r#"
[[credentials]]
key = "{LEGIT_KEY}"
role = "legitimate"

[[credentials]]
key = "{COVERT_KEY}"
role = "covert"

[tunnel]
secret = "{SECRET}"
upstream_timeout_secs = 2

[pipeline]
backend_url = "http://{backend}/api/remove-background"
api_key = "backend-key"

[fingerprint]
chunked = {chunked}
"#
        ))
        .expect("valid gateway config");

        let gateway = Arc::new(Gateway::from_config(&config).expect("gateway"));
        let app = server::router(gateway, &config.server);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let gateway_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            server::serve(listener, app).await.unwrap();
        });

        Self {
            gateway_url: format!("http://{gateway_addr}"),
            target_url: format!("http://{target}"),
            target_hits,
        }
    }

    pub fn client(&self, key: &str) -> TunnelClient {
        let config = ClientConfig {
            max_retries: 0,
            ..ClientConfig::new(self.gateway_url.clone(), key).with_secret(SECRET)
        };
        TunnelClient::new(config).unwrap()
    }

    pub fn hits(&self) -> usize {
        self.target_hits.load(Ordering::SeqCst)
    }
}

/// The site reached through the tunnel
fn target_router(hits: Arc<AtomicUsize>) -> Router {
    let ip_hits = hits.clone();
    let missing_hits = hits;
    Router::new()
        .route(
            "/ip",
            get(move || {
                ip_hits.fetch_add(1, Ordering::SeqCst);
                async { r#"{"origin": "127.0.0.1"}"# }
            }),
        )
        .route(
            "/missing",
            get(move || {
                missing_hits.fetch_add(1, Ordering::SeqCst);
                async { (StatusCode::NOT_FOUND, "<h1>Not Found</h1>\n") }
            }),
        )
}

/// Stand-in for the background-removal model server
fn backend_router() -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/api/remove-background", post(|| async { PROCESSED }))
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A port nothing listens on
pub async fn dead_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
