//! matte stego - hides a byte payload inside a lossless still image
//!
//! This crate provides:
//! - Closed-form carrier capacity and size selection
//! - A keyed traversal over the RGB least-significant bits
//! - AES-256-GCM sealing of the payload before embedding
//! - PNG and BMP container encoding

mod capacity;
mod carrier;
mod format;
mod traversal;

pub use capacity::*;
pub use carrier::*;
pub use format::*;
pub use traversal::*;
