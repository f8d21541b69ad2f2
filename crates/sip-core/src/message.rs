//! SIP request/response parsing and serialization.
//!
//! One UDP datagram carries exactly one message; torn or truncated
//! datagrams are rejected with a parse error rather than buffered.

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::error::{Result, SipCoreError};
use crate::headers::Headers;
use crate::method::SipMethod;

const SIP_VERSION: &str = "SIP/2.0";

/// A parsed SIP request.
#[derive(Debug, Clone)]
pub struct SipRequest {
    pub method: SipMethod,
    /// Request-URI exactly as received.
    pub uri: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// A parsed SIP response.
#[derive(Debug, Clone)]
pub struct SipResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// Either kind of SIP message, as popped off the wire.
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipRequest {
    pub fn new(method: SipMethod, uri: impl Into<String>) -> Self {
        SipRequest {
            method,
            uri: uri.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Attach a body and set `Content-Length`/`Content-Type`.
    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers.set("Content-Type", content_type);
        self.headers.set("Content-Length", body.len().to_string());
        self.body = body;
        self
    }

    /// CSeq sequence number, if parseable.
    pub fn cseq(&self) -> Option<(u32, SipMethod)> {
        parse_cseq(self.headers.get("CSeq")?)
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", self.method, self.uri, SIP_VERSION);
        ensure_content_length(&mut out, &self.headers, self.body.len());
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

impl SipResponse {
    /// Build a response for `request`, copying the dialog-identifying
    /// headers (Via, From, To, Call-ID, CSeq) as RFC 3261 requires.
    pub fn for_request(request: &SipRequest, status: u16, reason: &str) -> Self {
        let mut headers = Headers::new();
        for via in request.headers.get_all("Via") {
            headers.push("Via", via);
        }
        if let Some(from) = request.headers.get("From") {
            headers.push("From", from);
        }
        if let Some(to) = request.headers.get("To") {
            headers.push("To", to);
        }
        if let Some(call_id) = request.headers.get("Call-ID") {
            headers.push("Call-ID", call_id);
        }
        if let Some(cseq) = request.headers.get("CSeq") {
            headers.push("CSeq", cseq);
        }
        headers.push("Content-Length", "0");

        SipResponse {
            status,
            reason: reason.to_string(),
            headers,
            body: Vec::new(),
        }
    }

    /// Attach a body and set `Content-Length`/`Content-Type`.
    pub fn with_body(mut self, content_type: &str, body: Vec<u8>) -> Self {
        self.headers.set("Content-Type", content_type);
        self.headers.set("Content-Length", body.len().to_string());
        self.body = body;
        self
    }

    /// CSeq sequence number and method, if parseable.
    pub fn cseq(&self) -> Option<(u32, SipMethod)> {
        parse_cseq(self.headers.get("CSeq")?)
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!("{} {} {}\r\n", SIP_VERSION, self.status, self.reason);
        ensure_content_length(&mut out, &self.headers, self.body.len());
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

fn ensure_content_length(out: &mut String, headers: &Headers, body_len: usize) {
    let mut has_length = false;
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("Content-Length") || name == "l" {
            has_length = true;
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    if !has_length {
        out.push_str(&format!("Content-Length: {}\r\n", body_len));
    }
}

fn parse_cseq(value: &str) -> Option<(u32, SipMethod)> {
    let mut parts = value.split_whitespace();
    let seq = parts.next()?.parse().ok()?;
    let method = SipMethod::from_str(parts.next()?).ok()?;
    Some((seq, method))
}

impl SipMessage {
    /// Parse one datagram into a request or response.
    pub fn parse(data: &[u8]) -> Result<SipMessage> {
        let text = std::str::from_utf8(data)
            .map_err(|_| SipCoreError::malformed("message is not valid UTF-8"))?;

        let (head, body) = match text.find("\r\n\r\n") {
            Some(pos) => (&text[..pos], &data[pos + 4..]),
            // Tolerate bare-LF separators from sloppy test endpoints.
            None => match text.find("\n\n") {
                Some(pos) => (&text[..pos], &data[pos + 2..]),
                None => return Err(SipCoreError::malformed("missing header terminator")),
            },
        };

        let mut lines = head.lines();
        let start = lines
            .next()
            .ok_or_else(|| SipCoreError::malformed("empty message"))?;

        let mut headers = Headers::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| SipCoreError::InvalidHeader {
                    line: line.to_string(),
                })?;
            headers.push(name.trim(), value.trim());
        }

        // Honor Content-Length when present; it may be shorter than the
        // datagram remainder (trailing padding from some trunks).
        let body = match headers.get("Content-Length").and_then(|v| v.parse::<usize>().ok()) {
            Some(len) if len <= body.len() => body[..len].to_vec(),
            Some(len) => {
                return Err(SipCoreError::malformed(format!(
                    "Content-Length {} exceeds remaining {} bytes",
                    len,
                    body.len()
                )))
            }
            None => body.to_vec(),
        };

        trace!("parsed SIP message: {}", start);

        if let Some(rest) = start.strip_prefix(SIP_VERSION) {
            // Status line: "SIP/2.0 200 OK"
            let rest = rest.trim_start();
            let (code, reason) = rest
                .split_once(' ')
                .unwrap_or((rest, ""));
            let status = code.parse().map_err(|_| SipCoreError::InvalidStartLine {
                line: start.to_string(),
            })?;
            Ok(SipMessage::Response(SipResponse {
                status,
                reason: reason.to_string(),
                headers,
                body,
            }))
        } else {
            // Request line: "INVITE sip:user@host SIP/2.0"
            let mut parts = start.split_whitespace();
            let method = parts
                .next()
                .ok_or_else(|| SipCoreError::InvalidStartLine {
                    line: start.to_string(),
                })?
                .parse::<SipMethod>()?;
            let uri = parts
                .next()
                .ok_or_else(|| SipCoreError::InvalidStartLine {
                    line: start.to_string(),
                })?
                .to_string();
            if parts.next() != Some(SIP_VERSION) {
                return Err(SipCoreError::InvalidStartLine {
                    line: start.to_string(),
                });
            }
            Ok(SipMessage::Request(SipRequest {
                method,
                uri,
                headers,
                body,
            }))
        }
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipMessage::Request(r) => write!(f, "{} {}", r.method, r.uri),
            SipMessage::Response(r) => write!(f, "{} {}", r.status, r.reason),
        }
    }
}
