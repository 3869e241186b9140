//! Far end of the tunnel

use crate::{ClientConfig, ClientError};
use bytes::Bytes;
use matte_crypto::CarrierKey;
use matte_protocol::{RequestDescriptor, ResponseDescriptor};
use matte_stego::{Codec, SizeHint};
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Filename carriers are uploaded under
pub const CARRIER_FILENAME: &str = "proxy_request.png";

/// Room left for multipart framing around the carrier
const MULTIPART_OVERHEAD: usize = 512;

/// Outer HTTP response as seen on the wire
#[derive(Debug, Clone)]
pub struct OuterReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OuterReply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub struct TunnelClient {
    client: Client,
    config: ClientConfig,
    codec: Option<Codec>,
}

impl TunnelClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let codec = match config.secret.as_deref() {
            Some(secret) => Some(Codec::new(
                CarrierKey::from_secret(secret.as_bytes())?,
                config.carrier_format,
            )),
            None => None,
        };

        Ok(Self {
            client,
            config,
            codec,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Tunnel one request and return the upstream's answer
    pub async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, ClientError> {
        self.fetch_traced(request).await.map(|(descriptor, _)| descriptor)
    }

    /// Like `fetch`, also returning the outer response that carried the answer
    pub async fn fetch_traced(
        &self,
        request: &RequestDescriptor,
    ) -> Result<(ResponseDescriptor, OuterReply), ClientError> {
        let codec = self.codec.clone().ok_or(ClientError::NoSecret)?;

        let payload = request.to_bytes();
        let encoder = codec.clone();
        let carrier =
            tokio::task::spawn_blocking(move || encoder.encode(&payload, SizeHint::Auto)).await??;
        debug!(
            "Carrier {}x{} ({} bytes) for {} {}",
            carrier.width,
            carrier.height,
            carrier.bytes.len(),
            request.method,
            request.url
        );

        let limit = self.config.max_upload_bytes;
        if carrier.bytes.len().saturating_add(MULTIPART_OVERHEAD) > limit {
            return Err(ClientError::CarrierTooLarge {
                size: carrier.bytes.len(),
                limit,
            });
        }

        let reply = self
            .submit(Bytes::from(carrier.into_bytes()), CARRIER_FILENAME)
            .await?;
        if reply.status != StatusCode::OK {
            return Err(rejected(&reply));
        }

        let body = reply.body.clone();
        let decoded = tokio::task::spawn_blocking(move || codec.decode(&body)).await??;
        let descriptor = ResponseDescriptor::from_bytes(&decoded)?;
        Ok((descriptor, reply))
    }

    /// Legitimate background removal of `image`
    pub async fn remove_background(
        &self,
        image: impl Into<Bytes>,
        filename: &str,
    ) -> Result<OuterReply, ClientError> {
        let reply = self.submit(image.into(), filename).await?;
        if reply.status != StatusCode::OK {
            return Err(rejected(&reply));
        }
        Ok(reply)
    }

    /// POST one upload, retrying while the gateway answers 503
    pub async fn submit(&self, image: Bytes, filename: &str) -> Result<OuterReply, ClientError> {
        let mut attempt = 0;
        loop {
            let part = Part::bytes(image.to_vec())
                .file_name(filename.to_string())
                .mime_str(self.config.carrier_format.content_type())?;
            let form = Form::new().part("image", part);

            let response = self
                .client
                .post(self.config.endpoint())
                .header("X-API-Key", &self.config.api_key)
                .multipart(form)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::SERVICE_UNAVAILABLE && attempt < self.config.max_retries {
                let delay = self.config.backoff(attempt);
                warn!("Gateway warming up, retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let headers = response.headers().clone();
            let body = response.bytes().await?;
            return Ok(OuterReply {
                status,
                headers,
                body,
            });
        }
    }
}

fn rejected(reply: &OuterReply) -> ClientError {
    ClientError::Rejected {
        status: reply.status.as_u16(),
        body: String::from_utf8_lossy(&reply.body).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode as AxumStatus, routing::post};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;

    async fn spawn_gateway(cold_attempts: u32) -> (String, Arc<AtomicU32>) {
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/api/remove-background",
            post(move || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < cold_attempts {
                        (AxumStatus::SERVICE_UNAVAILABLE, "warming up")
                    } else {
                        (AxumStatus::OK, "done")
                    }
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hits)
    }

    fn fast_config(gateway: String, max_retries: u32) -> ClientConfig {
        ClientConfig {
            max_retries,
            retry_base_ms: 5,
            retry_max_ms: 20,
            ..ClientConfig::new(gateway, "k")
        }
    }

    #[tokio::test]
    async fn test_retries_on_503() {
        let (gateway, hits) = spawn_gateway(2).await;
        let client = TunnelClient::new(fast_config(gateway, 3)).unwrap();

        let reply = client.remove_background(&b"photo"[..], "a.png").await.unwrap();
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (gateway, hits) = spawn_gateway(10).await;
        let client = TunnelClient::new(fast_config(gateway, 1)).unwrap();

        let result = client.remove_background(&b"photo"[..], "a.png").await;
        assert!(matches!(result, Err(ClientError::Rejected { status: 503, .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_oversized_carrier_not_sent() {
        let (gateway, hits) = spawn_gateway(0).await;
        let config = ClientConfig {
            max_upload_bytes: 1024,
            ..ClientConfig::new(gateway, "k").with_secret("s3cret")
        };
        let client = TunnelClient::new(config).unwrap();

        let request = RequestDescriptor::get("https://example.test/").unwrap();
        let result = client.fetch(&request).await;
        assert!(matches!(
            result,
            Err(ClientError::CarrierTooLarge { limit: 1024, .. })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_requires_secret() {
        let client = TunnelClient::new(ClientConfig::new("http://127.0.0.1:9", "k")).unwrap();
        let request = RequestDescriptor::get("https://example.test/").unwrap();
        assert!(matches!(
            client.fetch(&request).await,
            Err(ClientError::NoSecret)
        ));
    }
}
