//! matte client - the far end of the image tunnel
//!
//! Builds carriers for outbound requests, submits them to the gateway as
//! ordinary background-removal uploads, and decodes the answers.

pub mod config;
pub mod tunnel;

pub use config::ClientConfig;
pub use tunnel::{CARRIER_FILENAME, OuterReply, TunnelClient};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid secret: {0}")]
    Key(#[from] matte_crypto::KeyError),

    #[error(transparent)]
    Stego(#[from] matte_stego::StegoError),

    #[error(transparent)]
    Framing(#[from] matte_protocol::FramingError),

    #[error("Gateway answered {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Carrier of {size} bytes exceeds the gateway upload limit of {limit} bytes")]
    CarrierTooLarge { size: usize, limit: usize },

    #[error("No tunnel secret configured")]
    NoSecret,

    #[error("Codec task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
