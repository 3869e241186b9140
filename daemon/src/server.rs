//! HTTP surface

use crate::config::ServerConfig;
use crate::dispatch::Gateway;
use crate::fingerprint::{Fingerprint, OuterResponse};
use crate::pipeline::Upload;
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const IMAGE_FIELD: &str = "image";

/// All gateway routes
pub fn router(gateway: Arc<Gateway>, config: &ServerConfig) -> Router {
    Router::new()
        .route(
            "/api/remove-background",
            get(describe_endpoint).post(remove_background),
        )
        .route("/api/warmup", get(warmup))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .with_state(RouterState {
            gateway,
            max_upload_bytes: config.max_upload_bytes,
        })
}

/// Serve `router` on an already bound listener until the task is dropped
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    info!("Gateway listening on {}", listener.local_addr()?);
    axum::serve(listener, router).await
}

#[derive(Clone)]
struct RouterState {
    gateway: Arc<Gateway>,
    max_upload_bytes: usize,
}

async fn remove_background(State(state): State<RouterState>, request: Request) -> Response {
    let gateway = state.gateway.as_ref();

    let api_key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    // authenticate before touching the body
    let session = match gateway.authenticate(api_key.as_deref()) {
        Ok(session) => session,
        Err(e) => return gateway.unauthorized(&e).into_response(),
    };

    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > state.max_upload_bytes) {
        return too_large(gateway.fingerprint()).into_response();
    }

    let upload = match read_upload(request, gateway.fingerprint()).await {
        Ok(upload) => upload,
        Err(response) => return response.into_response(),
    };
    debug!(
        "Upload of {} bytes for {} path",
        upload.bytes.len(),
        session.role().as_str()
    );

    gateway.serve(session, upload).await.into_response()
}

/// Pull the `image` field out of a multipart body
async fn read_upload(request: Request, fingerprint: &Fingerprint) -> Result<Upload, OuterResponse> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|_| fingerprint.error(StatusCode::BAD_REQUEST, "Invalid multipart body"))?;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(multipart_failure(fingerprint, e.status())),
        };
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }

        let filename = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(str::to_owned);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| multipart_failure(fingerprint, e.status()))?;

        return Ok(Upload {
            bytes,
            filename,
            content_type,
        });
    }

    Err(fingerprint.error(StatusCode::BAD_REQUEST, "No image provided"))
}

fn multipart_failure(fingerprint: &Fingerprint, status: StatusCode) -> OuterResponse {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(fingerprint)
    } else {
        fingerprint.error(StatusCode::BAD_REQUEST, "Invalid multipart body")
    }
}

fn too_large(fingerprint: &Fingerprint) -> OuterResponse {
    fingerprint.error(StatusCode::PAYLOAD_TOO_LARGE, "File too large")
}

async fn describe_endpoint() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/api/remove-background",
        "method": "POST",
        "content_type": "multipart/form-data",
        "required_fields": {
            "image": "Image file (jpg, png, webp, etc.)"
        },
        "description": "AI-powered background removal service"
    }))
}

async fn warmup(State(state): State<RouterState>) -> Response {
    match state.gateway.pipeline().probe().await {
        Ok(ready) => Json(json!({
            "status": "ok",
            "backend": if ready { "ready" } else { "starting" },
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "message": e.to_string() })),
        )
            .into_response(),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}
