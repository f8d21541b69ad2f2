//! SIP message model for the voxgate trunk UA.
//!
//! This crate covers exactly what an incoming-only trunk user agent
//! consumes: request/response parsing and serialization for
//! INVITE, ACK, BYE, CANCEL, OPTIONS and REGISTER, digest
//! authentication, and a minimal SDP offer/answer model with a fixed
//! audio codec priority.

pub mod auth;
pub mod error;
pub mod headers;
pub mod message;
pub mod method;
pub mod sdp;
pub mod uri;

pub use auth::{digest_authorization, DigestChallenge};
pub use error::{Result, SipCoreError};
pub use headers::Headers;
pub use message::{SipMessage, SipRequest, SipResponse};
pub use method::SipMethod;
pub use sdp::{build_audio_sdp, SdpMedia, SdpSession};
pub use uri::SipUri;

/// Generate a new RFC 3261 branch parameter (magic-cookie prefixed).
pub fn new_branch() -> String {
    format!("z9hG4bK{:016x}", rand::random::<u64>())
}

/// Generate a random dialog tag.
pub fn new_tag() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// Generate a random Call-ID.
pub fn new_call_id(host: &str) -> String {
    format!("{:016x}@{}", rand::random::<u64>(), host)
}
