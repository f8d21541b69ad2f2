//! Error handling for the media layer.

use thiserror::Error;

/// Result type alias for media operations.
pub type Result<T> = std::result::Result<T, MediaError>;

/// Errors produced by codecs and packet handling.
#[derive(Error, Debug)]
pub enum MediaError {
    /// Frame length does not match what the codec expects.
    #[error("Invalid frame size: expected {expected} samples, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },

    /// Payload could not be decoded.
    #[error("Invalid payload: {details}")]
    InvalidPayload { details: String },

    /// An RTP packet could not be parsed.
    #[error("Malformed RTP packet: {details}")]
    MalformedPacket { details: String },

    /// PCM byte buffer is not sample-aligned.
    #[error("PCM buffer length {len} is not a multiple of 2")]
    UnalignedPcm { len: usize },

    /// Codec initialization failed.
    #[error("Codec initialization failed: {reason}")]
    InitializationFailed { reason: String },

    /// Error surfaced by the Opus library.
    #[error("Opus error: {0}")]
    Opus(String),
}

impl From<opus::Error> for MediaError {
    fn from(e: opus::Error) -> Self {
        MediaError::Opus(e.to_string())
    }
}
