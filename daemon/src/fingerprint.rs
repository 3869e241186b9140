//! Fingerprint emulator
//!
//! Builds every outer response of the removal endpoint. The legitimate and
//! covert paths share these builders, so status, `Content-Type`,
//! `Content-Disposition`, `Server` and transfer framing cannot drift apart.

use crate::config::FingerprintConfig;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use matte_stego::CarrierFormat;
use serde::Deserialize;
use std::convert::Infallible;

/// `Content-Disposition` kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    #[default]
    Attachment,
    Inline,
}

impl Disposition {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Attachment => "attachment",
            Self::Inline => "inline",
        }
    }
}

/// Observable properties of a successful removal response
#[derive(Debug, Clone)]
pub struct ResponseProfile {
    pub server: String,
    pub disposition: Disposition,
    pub filename_suffix: String,
    pub chunked: bool,
    pub format: CarrierFormat,
    pub reject_status: StatusCode,
    pub reject_message: String,
}

impl ResponseProfile {
    pub fn from_config(config: &FingerprintConfig, format: CarrierFormat) -> Self {
        Self {
            server: config.server.clone(),
            disposition: config.disposition,
            filename_suffix: config.filename_suffix.clone(),
            chunked: config.chunked,
            format,
            reject_status: StatusCode::from_u16(config.reject_status)
                .unwrap_or(StatusCode::UNPROCESSABLE_ENTITY),
            reject_message: config.reject_message.clone(),
        }
    }
}

/// Outer HTTP response, before transfer framing is applied
#[derive(Debug, Clone)]
pub struct OuterResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub chunked: bool,
}

impl IntoResponse for OuterResponse {
    fn into_response(self) -> Response {
        let body = if self.chunked {
            // no size hint, so hyper frames it as chunked
            Body::from_stream(futures::stream::iter([Ok::<_, Infallible>(self.body)]))
        } else {
            Body::from(self.body)
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Response builder shared by both dispatch paths
#[derive(Debug, Clone)]
pub struct Fingerprint {
    profile: ResponseProfile,
}

impl Fingerprint {
    pub fn new(profile: ResponseProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &ResponseProfile {
        &self.profile
    }

    /// 200 with an image body
    pub fn success(&self, upload_name: Option<&str>, body: impl Into<Bytes>) -> OuterResponse {
        let mut headers = self.base_headers();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(self.profile.format.content_type()),
        );

        let disposition = format!(
            "{}; filename=\"{}\"",
            self.profile.disposition.as_str(),
            self.result_filename(upload_name)
        );
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }

        OuterResponse {
            status: StatusCode::OK,
            headers,
            body: body.into(),
            chunked: self.profile.chunked,
        }
    }

    /// Non-200 with a JSON `{"error": ...}` body
    pub fn error(&self, status: StatusCode, message: &str) -> OuterResponse {
        let mut headers = self.base_headers();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let body = serde_json::json!({ "error": message }).to_string();
        OuterResponse {
            status,
            headers,
            body: Bytes::from(body),
            chunked: false,
        }
    }

    /// The response for images the pipeline cannot process
    pub fn rejected(&self) -> OuterResponse {
        self.error(self.profile.reject_status, &self.profile.reject_message)
    }

    /// `<stem><suffix>.<ext>`, with the stem reduced to a safe charset
    pub fn result_filename(&self, upload_name: Option<&str>) -> String {
        let stem = upload_name
            .map(|name| match name.rsplit_once('.') {
                Some((stem, _)) if !stem.is_empty() => stem,
                _ => name,
            })
            .map(|stem| {
                stem.chars()
                    .filter(|c| !c.is_control())
                    .map(|c| {
                        if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                            c
                        } else {
                            '_'
                        }
                    })
                    .take(64)
                    .collect::<String>()
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "image".to_string());

        format!(
            "{}{}.{}",
            stem,
            self.profile.filename_suffix,
            self.profile.format.extension()
        )
    }

    fn base_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(server) = HeaderValue::from_str(&self.profile.server) {
            headers.insert(header::SERVER, server);
        }
        headers
    }
}
