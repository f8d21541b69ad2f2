//! Error handling for SIP parsing and building.

use thiserror::Error;

/// Result type alias for sip-core operations.
pub type Result<T> = std::result::Result<T, SipCoreError>;

/// Errors produced while parsing or building SIP messages.
#[derive(Error, Debug)]
pub enum SipCoreError {
    /// The datagram does not contain a complete SIP message.
    #[error("Malformed SIP message: {details}")]
    MalformedMessage { details: String },

    /// The start line is not a valid request or status line.
    #[error("Invalid start line: {line}")]
    InvalidStartLine { line: String },

    /// A header line could not be parsed.
    #[error("Invalid header line: {line}")]
    InvalidHeader { line: String },

    /// A SIP URI could not be parsed.
    #[error("Invalid SIP URI: {uri}")]
    InvalidUri { uri: String },

    /// The authentication challenge is missing a required parameter.
    #[error("Invalid digest challenge: {details}")]
    InvalidChallenge { details: String },

    /// An SDP body could not be parsed.
    #[error("Invalid SDP: {details}")]
    InvalidSdp { details: String },
}

impl SipCoreError {
    pub(crate) fn malformed(details: impl Into<String>) -> Self {
        SipCoreError::MalformedMessage {
            details: details.into(),
        }
    }

    pub(crate) fn sdp(details: impl Into<String>) -> Self {
        SipCoreError::InvalidSdp {
            details: details.into(),
        }
    }
}
