//! Shared tunnel secret and the subkeys derived from it

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const CIPHER_LABEL: &[u8] = b"matte/carrier/cipher/v1";
const MASK_LABEL: &[u8] = b"matte/carrier/length-mask/v1";
const TRAVERSAL_LABEL: &[u8] = b"matte/carrier/traversal/v1";

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Secret must not be empty")]
    EmptySecret,
}

/// Key material for carrier encoding, derived once from the shared secret.
///
/// The secret itself is not retained; only the three labelled subkeys are.
#[derive(Clone)]
pub struct CarrierKey {
    cipher_key: [u8; 32],
    mask_key: [u8; 32],
    traversal_seed: u64,
}

impl CarrierKey {
    /// Derive the subkeys from a shared secret of any length
    pub fn from_secret(secret: &[u8]) -> Result<Self, KeyError> {
        if secret.is_empty() {
            return Err(KeyError::EmptySecret);
        }

        let traversal = derive(secret, TRAVERSAL_LABEL);
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&traversal[..8]);

        Ok(Self {
            cipher_key: derive(secret, CIPHER_LABEL),
            mask_key: derive(secret, MASK_LABEL),
            traversal_seed: u64::from_le_bytes(seed),
        })
    }

    /// AES-256-GCM key for sealing payloads
    pub fn cipher_key(&self) -> &[u8; 32] {
        &self.cipher_key
    }

    /// Per-message mask applied to the embedded length prefix
    pub fn length_mask(&self, nonce: &[u8; 12]) -> [u8; 4] {
        let mut mac = HmacSha256::new_from_slice(&self.mask_key)
            .expect("HMAC can take key of any size");
        mac.update(nonce);
        let out: [u8; 32] = mac.finalize().into_bytes().into();
        [out[0], out[1], out[2], out[3]]
    }

    /// Seed for the keyed pixel-slot traversal
    pub fn traversal_seed(&self) -> u64 {
        self.traversal_seed
    }
}

impl fmt::Debug for CarrierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CarrierKey").finish_non_exhaustive()
    }
}

fn derive(secret: &[u8], label: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(label);
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let a = CarrierKey::from_secret(b"uc2Kz5hnQXiDroUhMs5UsoGML8ATWMMe").unwrap();
        let b = CarrierKey::from_secret(b"uc2Kz5hnQXiDroUhMs5UsoGML8ATWMMe").unwrap();

        assert_eq!(a.cipher_key(), b.cipher_key());
        assert_eq!(a.traversal_seed(), b.traversal_seed());
        assert_eq!(a.length_mask(&[7u8; 12]), b.length_mask(&[7u8; 12]));
    }

    #[test]
    fn test_subkeys_are_separated() {
        let key = CarrierKey::from_secret(b"secret").unwrap();
        assert_ne!(key.cipher_key(), &key.mask_key);
    }

    #[test]
    fn test_different_secrets_differ() {
        let a = CarrierKey::from_secret(b"secret-a").unwrap();
        let b = CarrierKey::from_secret(b"secret-b").unwrap();

        assert_ne!(a.cipher_key(), b.cipher_key());
        assert_ne!(a.traversal_seed(), b.traversal_seed());
    }

    #[test]
    fn test_mask_varies_with_nonce() {
        let key = CarrierKey::from_secret(b"secret").unwrap();
        assert_ne!(key.length_mask(&[0u8; 12]), key.length_mask(&[1u8; 12]));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(
            CarrierKey::from_secret(b""),
            Err(KeyError::EmptySecret)
        ));
    }

    #[test]
    fn test_debug_redacts() {
        let key = CarrierKey::from_secret(b"do-not-print").unwrap();
        let shown = format!("{key:?}");
        assert_eq!(shown, "CarrierKey { .. }");
    }
}
