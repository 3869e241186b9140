//! Inbound response descriptor: `STATUS-LINE LF BODY`
//!
//! The split happens on the first LF only; the body is raw and may contain
//! any bytes, further LFs included.

use crate::validation::{FramingError, SEPARATOR};
use bytes::Bytes;
use std::fmt;

/// Numeric status plus optional reason phrase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    code: u16,
    reason: Option<String>,
}

impl StatusLine {
    /// Status line without a reason phrase
    pub fn new(code: u16) -> Result<Self, FramingError> {
        check_code(code)?;
        Ok(Self { code, reason: None })
    }

    /// Status line with an explicit reason. The reason may not contain CR or LF.
    pub fn with_reason(code: u16, reason: impl Into<String>) -> Result<Self, FramingError> {
        check_code(code)?;
        let reason = reason.into();
        if reason.bytes().any(|b| b == SEPARATOR || b == b'\r') {
            return Err(FramingError::InvalidStatusLine(
                "reason contains a line break".into(),
            ));
        }
        let reason = reason.trim().to_string();
        Ok(Self {
            code,
            reason: (!reason.is_empty()).then_some(reason),
        })
    }

    /// Status line with the standard reason phrase, if `code` has one
    pub fn canonical(code: u16) -> Result<Self, FramingError> {
        check_code(code)?;
        let reason = http::StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .map(str::to_string);
        Ok(Self { code, reason })
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Parse `CODE[ SP REASON]`
    pub fn parse(line: &[u8]) -> Result<Self, FramingError> {
        let line = std::str::from_utf8(line)
            .map_err(|_| FramingError::MalformedResponse("status line is not UTF-8".into()))?;
        let line = line.trim_end_matches('\r');

        let (code_str, reason) = match line.split_once(' ') {
            Some((c, r)) => (c, r),
            None => (line, ""),
        };

        if code_str.len() != 3 || !code_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FramingError::MalformedResponse(format!(
                "bad status code: {code_str:?}"
            )));
        }
        let code: u16 = code_str
            .parse()
            .map_err(|_| FramingError::MalformedResponse("bad status code".into()))?;

        Self::with_reason(code, reason)
            .map_err(|e| FramingError::MalformedResponse(e.to_string()))
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            Some(reason) => write!(f, "{} {}", self.code, reason),
            None => write!(f, "{}", self.code),
        }
    }
}

fn check_code(code: u16) -> Result<(), FramingError> {
    if (100..=999).contains(&code) {
        Ok(())
    } else {
        Err(FramingError::InvalidStatusLine(format!(
            "status code {code} out of range"
        )))
    }
}

/// Upstream result relayed back through the tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDescriptor {
    pub status: StatusLine,
    pub body: Bytes,
}

impl ResponseDescriptor {
    pub fn new(status: StatusLine, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode_response(&self.status, &self.body)
    }

    pub fn from_bytes(payload: &[u8]) -> Result<Self, FramingError> {
        let (status, body) = parse_response(payload)?;
        Ok(Self { status, body })
    }
}

/// `status + SEPARATOR + body`
pub fn encode_response(status: &StatusLine, body: &[u8]) -> Vec<u8> {
    let line = status.to_string();
    let mut out = Vec::with_capacity(line.len() + 1 + body.len());
    out.extend_from_slice(line.as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(body);
    out
}

/// Split on the first SEPARATOR into status line and verbatim body
pub fn parse_response(payload: &[u8]) -> Result<(StatusLine, Bytes), FramingError> {
    let idx = payload
        .iter()
        .position(|&b| b == SEPARATOR)
        .ok_or_else(|| FramingError::MalformedResponse("missing separator".into()))?;

    let status = StatusLine::parse(&payload[..idx])?;
    let body = Bytes::copy_from_slice(&payload[idx + 1..]);
    Ok((status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let status = StatusLine::canonical(200).unwrap();
        assert_eq!(encode_response(&status, b"{}"), b"200 OK\n{}");

        let bare = StatusLine::new(204).unwrap();
        assert_eq!(encode_response(&bare, b""), b"204\n");
    }

    #[test]
    fn test_roundtrip() {
        let status = StatusLine::canonical(404).unwrap();
        let body = b"<html>\nnot found\n</html>\n";

        let (parsed_status, parsed_body) =
            parse_response(&encode_response(&status, body)).unwrap();
        assert_eq!(parsed_status, status);
        assert_eq!(parsed_body.as_ref(), body);
    }

    #[test]
    fn test_first_separator_wins() {
        let (status, body) = parse_response(b"200 OK\n\n\nbody\n").unwrap();
        assert_eq!(status.code(), 200);
        assert_eq!(body.as_ref(), b"\n\nbody\n");
    }

    #[test]
    fn test_binary_body_preserved() {
        let body: Vec<u8> = (0..=255u8).collect();
        let status = StatusLine::canonical(200).unwrap();
        let desc = ResponseDescriptor::new(status, body.clone());
        let back = ResponseDescriptor::from_bytes(&desc.to_bytes()).unwrap();
        assert_eq!(back.body.as_ref(), body.as_slice());
    }

    #[test]
    fn test_missing_separator() {
        assert!(matches!(
            parse_response(b"200 OK"),
            Err(FramingError::MalformedResponse(_))
        ));
        assert!(parse_response(b"").is_err());
    }

    #[test]
    fn test_bad_status_line() {
        assert!(parse_response(b"OK 200\nbody").is_err());
        assert!(parse_response(b"20\nbody").is_err());
        assert!(parse_response(b"099\nbody").is_err());
    }

    #[test]
    fn test_reason_with_line_break_rejected() {
        assert!(matches!(
            StatusLine::with_reason(200, "O\nK"),
            Err(FramingError::InvalidStatusLine(_))
        ));
    }

    #[test]
    fn test_code_range() {
        assert!(StatusLine::new(99).is_err());
        assert!(StatusLine::new(1000).is_err());
        assert!(StatusLine::new(599).is_ok());
    }

    #[test]
    fn test_crlf_status_line() {
        let (status, body) = parse_response(b"502 Bad Gateway\r\nx").unwrap();
        assert_eq!(status.reason(), Some("Bad Gateway"));
        assert_eq!(body.as_ref(), b"x");
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusLine::canonical(503).unwrap().to_string(), "503 Service Unavailable");
        assert_eq!(StatusLine::new(299).unwrap().to_string(), "299");
    }
}
