//! matte crypto - secrets, sealing, and request signing
//!
//! This crate provides:
//! - `CarrierKey`: subkeys derived from the shared tunnel secret
//! - AES-256-GCM sealing with caller-supplied nonces
//! - HMAC-SHA256 signing of pipeline requests
//! - Constant-time comparison of credentials

mod aes;
mod hmac_auth;
mod keys;

pub use aes::*;
pub use hmac_auth::*;
pub use keys::*;
