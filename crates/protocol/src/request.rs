//! Outbound request descriptor
//!
//! Layout:
//!
//! ```text
//! METHOD SP URL [LF
//! Name: value LF
//! ...
//! [LF BODY]]
//! ```
//!
//! The bare `METHOD SP URL` form (no trailing newline) is the common case.

use crate::validation::{
    FramingError, MAX_HEADERS, host_of, is_header_value, is_token, validate_target,
};
use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Methods the tunnel will execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    pub const ALL: [Method; 7] = [
        Method::Get,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Patch,
        Method::Delete,
        Method::Options,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = FramingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| FramingError::MalformedRequest(format!("unsupported method: {s}")))
    }
}

impl From<Method> for http::Method {
    fn from(m: Method) -> Self {
        match m {
            Method::Get => http::Method::GET,
            Method::Head => http::Method::HEAD,
            Method::Post => http::Method::POST,
            Method::Put => http::Method::PUT,
            Method::Patch => http::Method::PATCH,
            Method::Delete => http::Method::DELETE,
            Method::Options => http::Method::OPTIONS,
        }
    }
}

/// A single-shot HTTP request carried through the tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Parsed target; the host it names is the host that gets dialled
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl AsRef<str>) -> Result<Self, FramingError> {
        let url = validate_target(url.as_ref())?;
        Ok(Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        })
    }

    /// Shorthand for a GET request
    pub fn get(url: impl AsRef<str>) -> Result<Self, FramingError> {
        Self::new(Method::Get, url)
    }

    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, FramingError> {
        let (name, value) = (name.into(), value.into());
        check_header(&name, &value)?;
        if self.headers.len() >= MAX_HEADERS {
            return Err(FramingError::MalformedRequest("too many headers".into()));
        }
        self.headers.push((name, value));
        Ok(self)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Lowercased target host, for allow-list checks
    pub fn host(&self) -> String {
        host_of(&self.url)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serialize_request(self)
    }
}

/// Serialize a descriptor; inverse of [`parse_request`]
pub fn serialize_request(req: &RequestDescriptor) -> Vec<u8> {
    let url = req.url.as_str();
    let mut out = Vec::with_capacity(url.len() + 16);
    out.extend_from_slice(req.method.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(url.as_bytes());

    if req.headers.is_empty() && req.body.is_none() {
        return out;
    }

    out.push(b'\n');
    for (name, value) in &req.headers {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.push(b'\n');
    }
    if let Some(body) = &req.body {
        out.push(b'\n');
        out.extend_from_slice(body);
    }
    out
}

/// Parse a request descriptor from a decoded payload
pub fn parse_request(payload: &[u8]) -> Result<RequestDescriptor, FramingError> {
    let (first, mut rest) = split_line(payload);

    let line = std::str::from_utf8(first)
        .map_err(|_| FramingError::MalformedRequest("request line is not UTF-8".into()))?;
    let line = line.trim_end_matches('\r');

    let mut tokens = line.split_ascii_whitespace();
    let (method, target) = match (tokens.next(), tokens.next()) {
        (Some(m), Some(t)) => (m, t),
        _ => {
            return Err(FramingError::MalformedRequest(
                "expected `METHOD URL`".into(),
            ));
        }
    };
    if tokens.next().is_some() {
        return Err(FramingError::MalformedRequest(
            "unexpected token after target".into(),
        ));
    }

    let mut req = RequestDescriptor::new(method.parse()?, target)?;

    while let Some(block) = rest {
        if block.is_empty() {
            break;
        }
        let (line, next) = split_line(block);
        let line = std::str::from_utf8(line)
            .map_err(|_| FramingError::MalformedRequest("header is not UTF-8".into()))?
            .trim_end_matches('\r');

        if line.is_empty() {
            req.body = Some(Bytes::copy_from_slice(next.unwrap_or(&[])));
            break;
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FramingError::MalformedRequest(format!("bad header line: {line}")))?;
        req = req.with_header(name.trim(), value.trim())?;
        rest = next;
    }

    Ok(req)
}

fn check_header(name: &str, value: &str) -> Result<(), FramingError> {
    if !is_token(name) {
        return Err(FramingError::MalformedRequest(format!(
            "invalid header name: {name:?}"
        )));
    }
    if !is_header_value(value) {
        return Err(FramingError::MalformedRequest(format!(
            "invalid value for header {name}"
        )));
    }
    Ok(())
}

/// Split at the first LF; the remainder is `None` when there is no LF
fn split_line(buf: &[u8]) -> (&[u8], Option<&[u8]>) {
    match buf.iter().position(|&b| b == b'\n') {
        Some(i) => (&buf[..i], Some(&buf[i + 1..])),
        None => (buf, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let req = parse_request(b"GET https://example.test/ip").unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.url.as_str(), "https://example.test/ip");
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
    }

    #[test]
    fn test_parse_trailing_newline_and_crlf() {
        let req = parse_request(b"GET https://example.test/ip\r\n").unwrap();
        assert_eq!(req.url.as_str(), "https://example.test/ip");
        assert!(req.body.is_none());
    }

    #[test]
    fn test_parse_extra_whitespace() {
        let req = parse_request(b"POST    https://example.test/post").unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.url.as_str(), "https://example.test/post");
    }

    #[test]
    fn test_roundtrip_every_method() {
        for method in Method::ALL {
            let req = RequestDescriptor::new(method, "https://example.test/a?b=c").unwrap();
            let parsed = parse_request(&serialize_request(&req)).unwrap();
            assert_eq!(parsed.method, method);
            assert_eq!(parsed.url.as_str(), "https://example.test/a?b=c");
        }
    }

    #[test]
    fn test_roundtrip_headers_and_body() {
        let req = RequestDescriptor::new(Method::Post, "https://example.test/post")
            .unwrap()
            .with_header("Content-Type", "application/json")
            .unwrap()
            .with_header("Accept", "*/*")
            .unwrap()
            .with_body(&b"{\"a\":1}\n\nline"[..]);

        let bytes = serialize_request(&req);
        assert_eq!(parse_request(&bytes).unwrap(), req);
    }

    #[test]
    fn test_roundtrip_headers_without_body() {
        let req = RequestDescriptor::get("https://example.test/")
            .unwrap()
            .with_header("Accept", "text/plain")
            .unwrap();
        assert_eq!(parse_request(&serialize_request(&req)).unwrap(), req);
    }

    #[test]
    fn test_roundtrip_body_without_headers() {
        let req = RequestDescriptor::new(Method::Put, "https://example.test/put")
            .unwrap()
            .with_body(&b"raw"[..]);
        assert_eq!(parse_request(&serialize_request(&req)).unwrap(), req);
    }

    #[test]
    fn test_single_token_rejected() {
        assert!(matches!(
            parse_request(b"GET"),
            Err(FramingError::MalformedRequest(_))
        ));
        assert!(matches!(
            parse_request(b""),
            Err(FramingError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_unsupported_method_rejected() {
        assert!(matches!(
            parse_request(b"BREW https://example.test/pot"),
            Err(FramingError::MalformedRequest(_))
        ));
        assert!(parse_request(b"get https://example.test/").is_err());
    }

    #[test]
    fn test_extra_token_rejected() {
        assert!(parse_request(b"GET https://example.test/ HTTP/1.1").is_err());
    }

    #[test]
    fn test_bad_header_rejected() {
        assert!(parse_request(b"GET https://example.test/\nnot a header").is_err());
        assert!(parse_request(b"GET https://example.test/\nBad Name: x").is_err());
    }

    #[test]
    fn test_binary_garbage_rejected() {
        assert!(parse_request(&[0xFF, 0xFE, 0x00, 0x20, 0x01]).is_err());
    }

    #[test]
    fn test_host() {
        let req = RequestDescriptor::get("https://Example.Test:8443/ip").unwrap();
        assert_eq!(req.host(), "example.test");
    }

    #[test]
    fn test_host_is_the_dialled_host() {
        let req = parse_request(b"GET http://evil.test\\@allowed.test/ip").unwrap();
        assert_eq!(req.host(), "evil.test");

        let req = parse_request(b"GET http://allowed.test@evil.test/").unwrap();
        assert_eq!(req.host(), "evil.test");
    }

    #[test]
    fn test_serialized_target_is_normalized() {
        let req = parse_request(b"GET https://Example.Test").unwrap();
        assert_eq!(serialize_request(&req), b"GET https://example.test/");
    }
}
