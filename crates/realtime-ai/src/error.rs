//! Error handling for the realtime session.

use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Errors surfaced by the realtime AI session.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// WebSocket connect/send failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The session is not connected.
    #[error("Session is not connected")]
    NotConnected,

    /// A model key outside the supported set.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Event serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        RealtimeError::WebSocket(e.to_string())
    }
}
