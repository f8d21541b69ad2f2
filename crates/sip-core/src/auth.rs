//! SIP digest authentication (RFC 2617 / RFC 8760 MD5 profile).
//!
//! The trunk challenges REGISTER (and occasionally INVITE) with
//! `WWW-Authenticate`; we answer with an `Authorization` header.
//! Only the MD5 algorithm with optional `qop=auth` is supported, which
//! is what SIP trunks actually deploy.

use crate::error::{Result, SipCoreError};

/// A parsed digest challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub qop: Option<String>,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` / `Proxy-Authenticate` header value.
    pub fn parse(value: &str) -> Result<Self> {
        let rest = value
            .trim()
            .strip_prefix("Digest")
            .ok_or_else(|| SipCoreError::InvalidChallenge {
                details: format!("not a digest challenge: {}", value),
            })?;

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut opaque = None;
        let mut algorithm = None;

        for param in split_challenge_params(rest) {
            let Some((name, raw)) = param.split_once('=') else {
                continue;
            };
            let val = raw.trim().trim_matches('"').to_string();
            match name.trim().to_ascii_lowercase().as_str() {
                "realm" => realm = Some(val),
                "nonce" => nonce = Some(val),
                "qop" => qop = Some(val),
                "opaque" => opaque = Some(val),
                "algorithm" => algorithm = Some(val),
                _ => {}
            }
        }

        Ok(DigestChallenge {
            realm: realm.ok_or_else(|| SipCoreError::InvalidChallenge {
                details: "missing realm".into(),
            })?,
            nonce: nonce.ok_or_else(|| SipCoreError::InvalidChallenge {
                details: "missing nonce".into(),
            })?,
            qop,
            opaque,
            algorithm,
        })
    }

    /// Whether the challenge offers `qop=auth`.
    fn offers_auth_qop(&self) -> bool {
        self.qop
            .as_deref()
            .map(|q| q.split(',').any(|v| v.trim() == "auth"))
            .unwrap_or(false)
    }
}

/// Split challenge parameters on commas that are outside quoted strings.
fn split_challenge_params(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in s.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                out.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(s[start..].trim());
    out
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Build the `Authorization` header value answering `challenge`.
///
/// `method` and `uri` must match the request being authorized. When the
/// challenge offers `qop=auth` a fresh cnonce is generated and
/// `nc=00000001` is used; the trunk issues a new nonce per challenge so
/// the counter never advances.
pub fn digest_authorization(
    challenge: &DigestChallenge,
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
) -> String {
    let ha1 = md5_hex(&format!("{}:{}:{}", username, challenge.realm, password));
    let ha2 = md5_hex(&format!("{}:{}", method, uri));

    let mut parts = vec![
        format!("username=\"{}\"", username),
        format!("realm=\"{}\"", challenge.realm),
        format!("nonce=\"{}\"", challenge.nonce),
        format!("uri=\"{}\"", uri),
    ];

    let response = if challenge.offers_auth_qop() {
        let cnonce = format!("{:016x}", rand::random::<u64>());
        let nc = "00000001";
        let response = md5_hex(&format!(
            "{}:{}:{}:{}:auth:{}",
            ha1, challenge.nonce, nc, cnonce, ha2
        ));
        parts.push("qop=auth".to_string());
        parts.push(format!("nc={}", nc));
        parts.push(format!("cnonce=\"{}\"", cnonce));
        response
    } else {
        md5_hex(&format!("{}:{}:{}", ha1, challenge.nonce, ha2))
    };

    parts.push(format!("response=\"{}\"", response));
    parts.push("algorithm=MD5".to_string());
    if let Some(opaque) = &challenge.opaque {
        parts.push(format!("opaque=\"{}\"", opaque));
    }

    format!("Digest {}", parts.join(", "))
}
