//! Events emitted by the SIP engine.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use voxgate_media_core::CodecKind;

/// Opaque handle identifying one incoming call leg.
///
/// Backed by the SIP Call-ID; cheap to clone and hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallHandle(Arc<str>);

impl CallHandle {
    pub fn new(call_id: &str) -> Self {
        CallHandle(Arc::from(call_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Events emitted by the engine on its bounded channel.
///
/// Media-rate events (`AudioReceived`) are sent with `try_send`; a slow
/// consumer loses frames (counted and logged), never the RTP clock.
#[derive(Debug, Clone)]
pub enum SipEngineEvent {
    /// Registration state changed.
    RegistrationChanged {
        /// Whether the trunk currently accepts us.
        registered: bool,
    },

    /// A new INVITE passed the engine's own checks and awaits an
    /// accept/reject decision. Fires once per call, before answering.
    IncomingCall {
        call: CallHandle,
        /// Caller identity from the From header.
        caller_uri: String,
        /// Source address of the INVITE, for the trunk firewall.
        remote_ip: IpAddr,
    },

    /// A call was accepted and media is flowing.
    CallActive {
        call: CallHandle,
        /// The negotiated codec.
        codec: CodecKind,
    },

    /// One 20 ms (or larger) chunk of caller audio at 48 kHz PCM16.
    AudioReceived { call: CallHandle, pcm48: Bytes },

    /// The call leg is gone. Fires exactly once per accepted call;
    /// unanswered calls report `cancelled`, `invite_timeout` or
    /// `rejected`.
    CallEnded { call: CallHandle, reason: String },
}
