//! Carrier encode/decode
//!
//! Embedded envelope, written bit by bit (MSB first) into the RGB
//! least-significant bits in `Traversal` order:
//!
//! ```text
//! nonce[12] | (len_be32 ^ mask(nonce))[4] | ciphertext[len] | tag[16]
//! ```

use crate::capacity::{MAX_DIMENSION, OVERHEAD, SizeHint, capacity, max_capacity, select_size};
use crate::format::CarrierFormat;
use crate::traversal::Traversal;
use image::{DynamicImage, ImageReader, Limits, RgbaImage};
use matte_crypto::{Aes256GcmCipher, CarrierKey, NONCE_LEN};
use std::io::Cursor;
use thiserror::Error;
use tracing::trace;

const HEADER_LEN: usize = NONCE_LEN + 4;

#[derive(Error, Debug)]
pub enum StegoError {
    #[error("Payload of {needed} bytes exceeds carrier capacity of {capacity} bytes")]
    CapacityExceeded { needed: usize, capacity: usize },

    #[error("Unsupported carrier dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Image does not carry a payload for this key")]
    NotACarrier,

    #[error("Sealing failed")]
    SealFailed,

    #[error("Image encode error: {0}")]
    Encode(String),
}

/// An encoded carrier, ready to upload or to send as a response body
#[derive(Debug, Clone)]
pub struct CarrierImage {
    pub width: u32,
    pub height: u32,
    pub format: CarrierFormat,
    pub bytes: Vec<u8>,
}

impl CarrierImage {
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Keyed codec bound to one output format
#[derive(Debug, Clone)]
pub struct Codec {
    key: CarrierKey,
    format: CarrierFormat,
}

impl Codec {
    pub fn new(key: CarrierKey, format: CarrierFormat) -> Self {
        Self { key, format }
    }

    pub fn format(&self) -> CarrierFormat {
        self.format
    }

    pub fn encode(&self, payload: &[u8], hint: SizeHint) -> Result<CarrierImage, StegoError> {
        encode(payload, &self.key, self.format, hint)
    }

    pub fn decode(&self, image_bytes: &[u8]) -> Result<Vec<u8>, StegoError> {
        decode(image_bytes, &self.key)
    }
}

/// Seal `payload` with `key` and embed it in a fresh carrier
pub fn encode(
    payload: &[u8],
    key: &CarrierKey,
    format: CarrierFormat,
    hint: SizeHint,
) -> Result<CarrierImage, StegoError> {
    let (width, height) = match hint {
        SizeHint::Auto => select_size(payload.len()).ok_or(StegoError::CapacityExceeded {
            needed: payload.len(),
            capacity: max_capacity(),
        })?,
        SizeHint::Exact { width, height } => {
            if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
                return Err(StegoError::InvalidDimensions { width, height });
            }
            let available = capacity(width, height);
            if payload.len() > available {
                return Err(StegoError::CapacityExceeded {
                    needed: payload.len(),
                    capacity: available,
                });
            }
            (width, height)
        }
    };

    let cipher = Aes256GcmCipher::new(key.cipher_key());
    let nonce = Aes256GcmCipher::generate_nonce();
    let sealed = cipher
        .encrypt_with_nonce(&nonce, payload)
        .map_err(|_| StegoError::SealFailed)?;

    let mut len_bytes = (payload.len() as u32).to_be_bytes();
    let mask = key.length_mask(&nonce);
    for (b, m) in len_bytes.iter_mut().zip(mask) {
        *b ^= m;
    }

    let mut stream = Vec::with_capacity(OVERHEAD + payload.len());
    stream.extend_from_slice(&nonce);
    stream.extend_from_slice(&len_bytes);
    stream.extend_from_slice(&sealed);

    let mut raw = cover_pixels(width, height);
    let traversal = Traversal::new(key.traversal_seed(), slot_count(width, height));
    embed(&mut raw, &traversal, &stream);

    let image = RgbaImage::from_raw(width, height, raw)
        .ok_or(StegoError::InvalidDimensions { width, height })?;

    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), format.image_format())
        .map_err(|e| StegoError::Encode(e.to_string()))?;

    trace!(
        "Encoded {} payload bytes into {}x{} {} carrier",
        payload.len(),
        width,
        height,
        format
    );

    Ok(CarrierImage {
        width,
        height,
        format,
        bytes,
    })
}

/// Extract and open the payload from an encoded image
pub fn decode(image_bytes: &[u8], key: &CarrierKey) -> Result<Vec<u8>, StegoError> {
    let mut reader = ImageReader::new(Cursor::new(image_bytes))
        .with_guessed_format()
        .map_err(|_| StegoError::NotACarrier)?;

    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_DIMENSION);
    limits.max_image_height = Some(MAX_DIMENSION);
    reader.limits(limits);

    let image = reader.decode().map_err(|_| StegoError::NotACarrier)?;
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let raw = rgba.as_raw();

    let slots = slot_count(width, height);
    if (slots / 8) < OVERHEAD as u64 {
        return Err(StegoError::NotACarrier);
    }
    let traversal = Traversal::new(key.traversal_seed(), slots);

    let header = extract(raw, &traversal, 0, HEADER_LEN);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&header[..NONCE_LEN]);

    let mask = key.length_mask(&nonce);
    let mut len_bytes = [0u8; 4];
    for (i, b) in len_bytes.iter_mut().enumerate() {
        *b = header[NONCE_LEN + i] ^ mask[i];
    }
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > capacity(width, height) {
        return Err(StegoError::NotACarrier);
    }

    let sealed = extract(raw, &traversal, HEADER_LEN, len + matte_crypto::TAG_LEN);
    let cipher = Aes256GcmCipher::new(key.cipher_key());
    cipher
        .decrypt_with_nonce(&nonce, &sealed)
        .map_err(|_| StegoError::NotACarrier)
}

fn slot_count(width: u32, height: u32) -> u64 {
    width as u64 * height as u64 * crate::capacity::BITS_PER_PIXEL as u64
}

/// Byte offset in an RGBA buffer of channel slot `slot`
#[inline]
fn slot_offset(slot: u64) -> usize {
    let pixel = (slot / 3) as usize;
    let channel = (slot % 3) as usize;
    pixel * 4 + channel
}

fn cover_pixels(width: u32, height: u32) -> Vec<u8> {
    let mut rng = fastrand::Rng::new();
    let mut raw = vec![0u8; width as usize * height as usize * 4];
    for px in raw.chunks_exact_mut(4) {
        px[0] = rng.u8(..);
        px[1] = rng.u8(..);
        px[2] = rng.u8(..);
        px[3] = 0xFF;
    }
    raw
}

fn embed(raw: &mut [u8], traversal: &Traversal, stream: &[u8]) {
    for (byte_idx, byte) in stream.iter().enumerate() {
        for bit_offset in 0..8 {
            let bit = (byte >> (7 - bit_offset)) & 1;
            let slot = traversal.slot((byte_idx * 8 + bit_offset) as u64);
            let off = slot_offset(slot);
            raw[off] = (raw[off] & 0xFE) | bit;
        }
    }
}

/// Read `len` bytes starting at stream byte `start`.
/// Callers guarantee `(start + len) * 8 <= traversal.len()`.
fn extract(raw: &[u8], traversal: &Traversal, start: usize, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    for (i, byte) in out.iter_mut().enumerate() {
        for bit_offset in 0..8 {
            let slot = traversal.slot(((start + i) * 8 + bit_offset) as u64);
            let bit = raw[slot_offset(slot)] & 1;
            *byte |= bit << (7 - bit_offset);
        }
    }
    out
}
