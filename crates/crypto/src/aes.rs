//! AES-256-GCM sealing

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;
use thiserror::Error;

/// Nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes
pub const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum AesError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Ciphertext too short")]
    CiphertextTooShort,
}

/// AES-256-GCM cipher wrapper
pub struct Aes256GcmCipher {
    cipher: Aes256Gcm,
}

impl Aes256GcmCipher {
    /// Create a new cipher from a 32-byte key
    pub fn new(key: &[u8; 32]) -> Self {
        let cipher = Aes256Gcm::new_from_slice(key).expect("key length is 32");
        Self { cipher }
    }

    /// Fresh random nonce from the OS RNG
    pub fn generate_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        nonce
    }

    /// Encrypt with a specific nonce
    /// Returns: ciphertext || tag (16 bytes)
    pub fn encrypt_with_nonce(
        &self,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, AesError> {
        let nonce = Nonce::from_slice(nonce);
        self.cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| AesError::EncryptionFailed)
    }

    /// Decrypt with a specific nonce (expects ciphertext || tag)
    pub fn decrypt_with_nonce(
        &self,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, AesError> {
        if ciphertext.len() < TAG_LEN {
            return Err(AesError::CiphertextTooShort);
        }

        let nonce = Nonce::from_slice(nonce);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| AesError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt() {
        let cipher = Aes256GcmCipher::new(&[0u8; 32]);
        let nonce = Aes256GcmCipher::generate_nonce();

        let plaintext = b"GET https://example.test/ip";
        let sealed = cipher.encrypt_with_nonce(&nonce, plaintext).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + TAG_LEN);

        let opened = cipher.decrypt_with_nonce(&nonce, &sealed).unwrap();
        assert_eq!(plaintext.as_slice(), opened.as_slice());
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let cipher1 = Aes256GcmCipher::new(&[0u8; 32]);
        let cipher2 = Aes256GcmCipher::new(&[1u8; 32]);
        let nonce = [9u8; NONCE_LEN];

        let sealed = cipher1.encrypt_with_nonce(&nonce, b"secret").unwrap();
        let result = cipher2.decrypt_with_nonce(&nonce, &sealed);

        assert!(matches!(result, Err(AesError::DecryptionFailed)));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let cipher = Aes256GcmCipher::new(&[3u8; 32]);
        let nonce = [1u8; NONCE_LEN];

        let mut sealed = cipher.encrypt_with_nonce(&nonce, b"payload").unwrap();
        sealed[0] ^= 0x01;

        assert!(cipher.decrypt_with_nonce(&nonce, &sealed).is_err());
    }

    #[test]
    fn test_short_ciphertext() {
        let cipher = Aes256GcmCipher::new(&[3u8; 32]);
        let result = cipher.decrypt_with_nonce(&[0u8; NONCE_LEN], &[0u8; 4]);
        assert!(matches!(result, Err(AesError::CiphertextTooShort)));
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = Aes256GcmCipher::new(&[5u8; 32]);
        let nonce = [2u8; NONCE_LEN];

        let sealed = cipher.encrypt_with_nonce(&nonce, b"").unwrap();
        assert_eq!(sealed.len(), TAG_LEN);
        assert!(cipher.decrypt_with_nonce(&nonce, &sealed).unwrap().is_empty());
    }
}
