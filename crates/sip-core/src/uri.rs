//! Minimal SIP URI model.

use std::fmt;
use std::str::FromStr;

use crate::error::SipCoreError;

/// A parsed `sip:` URI.
///
/// Covers the subset a trunk UA needs: `sip:user@host:port;params`.
/// Display names and angle brackets are handled at the header layer
/// ([`crate::headers::Headers::address`]), not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    /// User part, if present (`alice` in `sip:alice@example.com`).
    pub user: Option<String>,
    /// Host (domain name or IP literal).
    pub host: String,
    /// Explicit port, if present.
    pub port: Option<u16>,
    /// URI parameters after the host, in order (`transport=udp`, `lr`, ...).
    pub params: Vec<(String, Option<String>)>,
}

impl SipUri {
    /// Build a bare `sip:host` URI.
    pub fn server(host: impl Into<String>) -> Self {
        SipUri {
            user: None,
            host: host.into(),
            port: None,
            params: Vec::new(),
        }
    }

    /// Build a `sip:user@host` URI.
    pub fn user_at(user: impl Into<String>, host: impl Into<String>) -> Self {
        SipUri {
            user: Some(user.into()),
            host: host.into(),
            port: None,
            params: Vec::new(),
        }
    }

    /// Set an explicit port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// `host:port` (or just `host`) for socket addressing.
    pub fn host_port(&self) -> String {
        match self.port {
            Some(p) => format!("{}:{}", self.host, p),
            None => self.host.clone(),
        }
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sip:")?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (name, value) in &self.params {
            match value {
                Some(v) => write!(f, ";{}={}", name, v)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

impl FromStr for SipUri {
    type Err = SipCoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SipCoreError::InvalidUri { uri: s.to_string() };

        let rest = s
            .strip_prefix("sip:")
            .or_else(|| s.strip_prefix("sips:"))
            .ok_or_else(invalid)?;

        // Split off URI parameters first.
        let mut parts = rest.split(';');
        let addr = parts.next().ok_or_else(invalid)?;
        let params = parts
            .map(|p| match p.split_once('=') {
                Some((n, v)) => (n.to_string(), Some(v.to_string())),
                None => (p.to_string(), None),
            })
            .collect();

        let (user, host_port) = match addr.rsplit_once('@') {
            Some((user, hp)) => (Some(user.to_string()), hp),
            None => (None, addr),
        };

        // IPv6 literals keep their brackets as part of the host.
        let (host, port) = if host_port.starts_with('[') {
            match host_port.rsplit_once("]:") {
                Some((h, p)) => (
                    format!("{}]", h),
                    Some(p.parse::<u16>().map_err(|_| invalid())?),
                ),
                None => (host_port.to_string(), None),
            }
        } else {
            match host_port.rsplit_once(':') {
                Some((h, p)) => (
                    h.to_string(),
                    Some(p.parse::<u16>().map_err(|_| invalid())?),
                ),
                None => (host_port.to_string(), None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }

        Ok(SipUri {
            user,
            host,
            port,
            params,
        })
    }
}
