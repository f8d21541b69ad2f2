//! Incoming-only SIP trunk engine.
//!
//! The engine keeps one registered identity on a SIP trunk, accepts (or
//! rejects) one incoming call at a time, and bridges the negotiated RTP
//! stream to 48 kHz PCM16 frames on an [`AudioBridgePort`]. All
//! signalling and media I/O runs on tokio tasks owned by the engine;
//! consumers interact through a cloneable [`SipEngineHandle`] and a
//! bounded [`SipEngineEvent`] channel that media tasks never block on.

pub mod bridge;
pub mod config;
pub mod dialog;
pub mod engine;
pub mod error;
pub mod events;
pub mod registration;
pub mod rtp;

pub use bridge::AudioBridgePort;
pub use config::SipEngineConfig;
pub use engine::{SipEngine, SipEngineHandle};
pub use error::{Result, SipEngineError};
pub use events::{CallHandle, SipEngineEvent};
