//! SIP request methods consumed by the trunk UA.

use std::fmt;
use std::str::FromStr;

use crate::error::SipCoreError;

/// SIP request method.
///
/// Only the methods a trunk-facing, incoming-only UA actually exchanges
/// are modelled; anything else parses as [`SipMethod::Other`] so the
/// transport can answer 405 instead of dropping the datagram.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SipMethod {
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Register,
    /// Any method outside the supported set (e.g. SUBSCRIBE, INFO).
    Other(String),
}

impl SipMethod {
    /// Canonical on-the-wire spelling.
    pub fn as_str(&self) -> &str {
        match self {
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Options => "OPTIONS",
            SipMethod::Register => "REGISTER",
            SipMethod::Other(m) => m,
        }
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SipMethod {
    type Err = SipCoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "INVITE" => SipMethod::Invite,
            "ACK" => SipMethod::Ack,
            "BYE" => SipMethod::Bye,
            "CANCEL" => SipMethod::Cancel,
            "OPTIONS" => SipMethod::Options,
            "REGISTER" => SipMethod::Register,
            other if !other.is_empty() && other.chars().all(|c| c.is_ascii_uppercase()) => {
                SipMethod::Other(other.to_string())
            }
            other => {
                return Err(SipCoreError::InvalidStartLine {
                    line: other.to_string(),
                })
            }
        })
    }
}
