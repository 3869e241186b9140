//! Framing limits and validation

use thiserror::Error;
use url::{Host, Url};

/// Framing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid status line: {0}")]
    InvalidStatusLine(String),
}

/// Byte separating the status line from the response body
pub const SEPARATOR: u8 = b'\n';

/// Maximum target URL length in bytes
pub const MAX_URL_LEN: usize = 2048;

/// Maximum number of headers in a request block
pub const MAX_HEADERS: usize = 64;

/// Parse a tunnel target: absolute http(s) URL with a host, bounded, no whitespace
pub fn validate_target(url: &str) -> Result<Url, FramingError> {
    if url.len() > MAX_URL_LEN {
        return Err(FramingError::MalformedRequest(format!(
            "target is {} bytes (max: {})",
            url.len(),
            MAX_URL_LEN
        )));
    }

    if url.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return Err(FramingError::MalformedRequest(
            "target contains whitespace or control bytes".into(),
        ));
    }

    // The URL parser forgives `http:host` and `http:///host`; a target must
    // spell out its authority.
    let authority = ["https://", "http://"].iter().find_map(|scheme| {
        url.get(..scheme.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
            .map(|_| &url[scheme.len()..])
    });
    match authority {
        Some(rest) if !rest.is_empty() && !rest.starts_with(['/', '\\']) => {}
        _ => {
            return Err(FramingError::MalformedRequest(
                "target must be an absolute http(s) URL".into(),
            ));
        }
    }

    let parsed = Url::parse(url)
        .map_err(|e| FramingError::MalformedRequest(format!("invalid target: {e}")))?;
    if host_of(&parsed).is_empty() {
        return Err(FramingError::MalformedRequest("target has no host".into()));
    }
    Ok(parsed)
}

/// Host the target resolves to, lowercased, without port, userinfo or brackets
pub fn host_of(url: &Url) -> String {
    match url.host() {
        Some(Host::Domain(domain)) => domain.to_ascii_lowercase(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        None => String::new(),
    }
}

pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
                        | b'_' | b'`' | b'|' | b'~'
                )
        })
}

pub(crate) fn is_header_value(s: &str) -> bool {
    s.bytes().all(|b| b == b'\t' || !b.is_ascii_control())
}
