//! matte protocol - byte layouts carried inside carrier images
//!
//! This crate defines:
//! - `RequestDescriptor`: `METHOD SP URL`, optionally followed by a header
//!   block and a body
//! - `ResponseDescriptor`: `STATUS-LINE LF BODY`
//! - Limits and validation shared by both ends of the tunnel
//!
//! Parsers are total: every byte input yields a value or a `FramingError`.

mod request;
mod response;
mod validation;

pub use request::*;
pub use response::*;
pub use validation::*;

pub use url::Url;
