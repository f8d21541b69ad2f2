//! Realtime AI session for voxgate.
//!
//! One WebSocket per call carries JSON events and base64 PCM16 audio in
//! both directions. The session tracks the response lifecycle, keeps
//! per-category token counters that survive a live model switch, and
//! dispatches tool calls to a typed [`SessionObserver`] instead of a
//! bag of optional callbacks.

pub mod error;
pub mod model;
pub mod observer;
pub mod protocol;
pub mod session;

pub use error::{RealtimeError, Result};
pub use model::ModelKey;
pub use observer::{AiState, SessionObserver, TranscriptRole, UsageSnapshot};
pub use session::{RealtimeSession, SessionConfig};

/// Sentinel returned by the orchestrator when a tool call replaced the
/// session in flight; the stale call_id must not be answered.
pub const MODEL_SWITCHED_SENTINEL: &str = "__MODEL_SWITCHED__";

/// Prefix for tool results that are delivered without triggering a new
/// response (the silent security-gate path).
pub const BEEP_QUIET_PREFIX: &str = "__BEEP_QUIET__:";
