//! Outer fingerprint parity between the legitimate and covert paths

mod integration_harness;

use integration_harness::{COVERT_KEY, Harness, LEGIT_KEY};
use matte_client::{CARRIER_FILENAME, OuterReply};
use matte_protocol::RequestDescriptor;

async fn both_paths(h: &Harness) -> (OuterReply, OuterReply) {
    let legit = h
        .client(LEGIT_KEY)
        .remove_background(&b"photo"[..], CARRIER_FILENAME)
        .await
        .unwrap();

    let request = RequestDescriptor::get(format!("{}/ip", h.target_url)).unwrap();
    let (_, covert) = h.client(COVERT_KEY).fetch_traced(&request).await.unwrap();

    (legit, covert)
}

fn assert_parity(legit: &OuterReply, covert: &OuterReply) {
    assert_eq!(legit.status, covert.status);
    assert_eq!(legit.header("content-type"), covert.header("content-type"));
    assert_eq!(
        legit.header("content-disposition"),
        covert.header("content-disposition")
    );
    assert_eq!(
        legit.header("transfer-encoding").is_some(),
        covert.header("transfer-encoding").is_some()
    );
    assert_eq!(
        legit.header("content-length").is_some(),
        covert.header("content-length").is_some()
    );
    assert_eq!(legit.header("server"), covert.header("server"));
}

#[tokio::test]
async fn test_parity_with_content_length() {
    let h = Harness::start().await;
    let (legit, covert) = both_paths(&h).await;

    assert_parity(&legit, &covert);
    assert_eq!(covert.header("content-type"), Some("image/png"));
    assert_eq!(
        covert.header("content-disposition"),
        Some("attachment; filename=\"proxy_request_no_bg.png\"")
    );
    assert!(covert.header("content-length").is_some());
    assert!(covert.header("transfer-encoding").is_none());
}

#[tokio::test]
async fn test_parity_with_chunked_transfer() {
    let h = Harness::start_with(true).await;
    let (legit, covert) = both_paths(&h).await;

    assert_parity(&legit, &covert);
    assert_eq!(covert.header("transfer-encoding"), Some("chunked"));
}

#[tokio::test]
async fn test_error_shape_matches() {
    let h = Harness::start().await;

    // covert key, multipart body without an image field
    let bad_upload = reqwest::Client::new()
        .post(format!("{}/api/remove-background", h.gateway_url))
        .header("X-API-Key", COVERT_KEY)
        .multipart(reqwest::multipart::Form::new().text("file", "x"))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_upload.status().as_u16(), 400);
    let server = bad_upload
        .headers()
        .get("server")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let content_type = bad_upload
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    assert_eq!(server.as_deref(), Some("uvicorn"));
    assert_eq!(content_type.as_deref(), Some("application/json"));
}
