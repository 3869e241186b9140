//! HMAC-SHA256 request signing for the background-removal backend
//!
//! Contract shared with the backend:
//! `string_to_sign = "{timestamp}:{nonce}:{hex(sha256(body))}"`,
//! signature = `hex(HMAC-SHA256(api_key, string_to_sign))`.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug)]
pub enum HmacError {
    #[error("API key must not be empty")]
    EmptyKey,

    #[error("HMAC verification failed")]
    VerificationFailed,
}

/// Headers produced for one signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub timestamp: String,
    pub nonce: String,
    pub body_hash_hex: String,
    pub string_to_sign: String,
    pub signature_hex: String,
}

impl SignedHeaders {
    /// `(name, value)` pairs ready to attach to an outgoing request
    pub fn header_pairs(&self) -> [(&'static str, &str); 3] {
        [
            ("X-Timestamp", self.timestamp.as_str()),
            ("X-Nonce", self.nonce.as_str()),
            ("X-Signature", self.signature_hex.as_str()),
        ]
    }
}

/// Signs request bodies with the pipeline API key
pub struct RequestSigner {
    api_key: Vec<u8>,
}

impl RequestSigner {
    pub fn new(api_key: impl AsRef<[u8]>) -> Result<Self, HmacError> {
        let api_key = api_key.as_ref();
        if api_key.is_empty() {
            return Err(HmacError::EmptyKey);
        }
        Ok(Self {
            api_key: api_key.to_vec(),
        })
    }

    /// Sign a body with the current time and a fresh UUID nonce
    pub fn sign(&self, body: &[u8]) -> SignedHeaders {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let nonce = uuid::Uuid::new_v4().to_string();
        self.sign_at(body, now, &nonce)
    }

    /// Sign with an explicit timestamp and nonce
    pub fn sign_at(&self, body: &[u8], timestamp: u64, nonce: &str) -> SignedHeaders {
        let body_hash_hex = hex::encode(Sha256::digest(body));
        let timestamp = timestamp.to_string();
        let string_to_sign = format!("{}:{}:{}", timestamp, nonce, body_hash_hex);
        let signature_hex = hex::encode(self.compute(string_to_sign.as_bytes()));

        SignedHeaders {
            timestamp,
            nonce: nonce.to_string(),
            body_hash_hex,
            string_to_sign,
            signature_hex,
        }
    }

    /// Verify a hex signature over `timestamp:nonce:sha256(body)`
    pub fn verify(
        &self,
        body: &[u8],
        timestamp: &str,
        nonce: &str,
        signature_hex: &str,
    ) -> Result<(), HmacError> {
        let body_hash_hex = hex::encode(Sha256::digest(body));
        let string_to_sign = format!("{}:{}:{}", timestamp, nonce, body_hash_hex);
        let expected = hex::encode(self.compute(string_to_sign.as_bytes()));

        if constant_time_eq(expected.as_bytes(), signature_hex.as_bytes()) {
            Ok(())
        } else {
            Err(HmacError::VerificationFailed)
        }
    }

    fn compute(&self, data: &[u8]) -> [u8; 32] {
        let mut mac =
            HmacSha256::new_from_slice(&self.api_key).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }
}

/// Constant-time comparison; runs over the full length of both inputs
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len = a.len().max(b.len());
    let mut result = a.len() ^ b.len();
    for i in 0..len {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        result |= (x ^ y) as usize;
    }
    result == 0
}
