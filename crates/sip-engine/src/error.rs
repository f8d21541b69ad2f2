//! Error handling for the SIP engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SipEngineError>;

/// Errors surfaced by the SIP engine.
#[derive(Error, Debug)]
pub enum SipEngineError {
    /// Socket setup or I/O failed.
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// SIP parsing/building failed.
    #[error("SIP protocol error: {0}")]
    Protocol(#[from] voxgate_sip_core::SipCoreError),

    /// Media layer failure.
    #[error("Media error: {0}")]
    Media(#[from] voxgate_media_core::MediaError),

    /// Operation referenced a call the engine does not know.
    #[error("Unknown call: {0}")]
    UnknownCall(String),

    /// Operation is invalid in the call's current state.
    #[error("Invalid call state for {call}: {details}")]
    InvalidState { call: String, details: String },

    /// No RTP port was free in the configured range.
    #[error("RTP port range {start}-{end} exhausted")]
    RtpPortsExhausted { start: u16, end: u16 },

    /// The offer contained no codec we support.
    #[error("No common codec with remote offer")]
    NoCommonCodec,
}
