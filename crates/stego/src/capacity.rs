//! Carrier capacity and size selection

use matte_crypto::{NONCE_LEN, TAG_LEN};

/// Bytes of the embedded envelope that are not payload:
/// nonce, masked length prefix, GCM tag
pub const OVERHEAD: usize = NONCE_LEN + 4 + TAG_LEN;

/// Payload bits stored per pixel (one LSB in each of R, G, B)
pub const BITS_PER_PIXEL: usize = 3;

/// Square carrier sides tried by `SizeHint::Auto`, smallest first
pub const SUPPORTED_SIDES: [u32; 7] = [32, 64, 128, 256, 512, 1024, 2048];

/// Largest width or height accepted when encoding or decoding
pub const MAX_DIMENSION: u32 = 4096;

/// How the encoder picks carrier dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeHint {
    /// Smallest supported square that holds the payload
    #[default]
    Auto,
    /// Caller-chosen dimensions; the payload must fit
    Exact { width: u32, height: u32 },
}

/// Payload bytes a `width` x `height` carrier can hold
pub fn capacity(width: u32, height: u32) -> usize {
    let slots = width as usize * height as usize * BITS_PER_PIXEL;
    (slots / 8).saturating_sub(OVERHEAD)
}

/// Capacity of the largest supported carrier
pub fn max_capacity() -> usize {
    let side = SUPPORTED_SIDES[SUPPORTED_SIDES.len() - 1];
    capacity(side, side)
}

/// Smallest supported square able to carry `payload_len` bytes
pub fn select_size(payload_len: usize) -> Option<(u32, u32)> {
    SUPPORTED_SIDES
        .iter()
        .find(|&&side| capacity(side, side) >= payload_len)
        .map(|&side| (side, side))
}
