//! Trunk audio codecs.
//!
//! Codec priority on the trunk is fixed: Opus > G.722 > PCMA > PCMU.
//! All codecs operate on 20 ms frames at their native audio rate; the
//! engine resamples between the codec rate and the 48 kHz bridge.

mod g711;
mod g722;
mod opus_codec;

pub use g711::{alaw_decode, alaw_encode, ulaw_decode, ulaw_encode, G711Codec, G711Variant};
pub use g722::G722Codec;
pub use opus_codec::OpusCodec;

use crate::error::Result;

/// Stateful audio codec over 20 ms PCM16 frames.
pub trait AudioCodec: Send {
    /// Which codec this is.
    fn kind(&self) -> CodecKind;

    /// Encode one 20 ms frame at the codec's audio rate.
    fn encode(&mut self, samples: &[i16]) -> Result<Vec<u8>>;

    /// Decode one RTP payload to PCM16 at the codec's audio rate.
    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>>;
}

/// The negotiable trunk codecs, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Opus,
    G722,
    Pcma,
    Pcmu,
}

impl CodecKind {
    /// All codecs in negotiation priority order.
    pub const PRIORITY: [CodecKind; 4] = [
        CodecKind::Opus,
        CodecKind::G722,
        CodecKind::Pcma,
        CodecKind::Pcmu,
    ];

    /// SDP encoding name (the part before the slash in rtpmap).
    pub fn encoding_name(self) -> &'static str {
        match self {
            CodecKind::Opus => "opus",
            CodecKind::G722 => "G722",
            CodecKind::Pcma => "PCMA",
            CodecKind::Pcmu => "PCMU",
        }
    }

    /// Full rtpmap value.
    ///
    /// G.722's RTP clock is 8000 Hz by RFC 3551's historical erratum
    /// even though the audio runs at 16 kHz; Opus always advertises
    /// 48000/2 regardless of the actual channel count.
    pub fn rtpmap(self) -> &'static str {
        match self {
            CodecKind::Opus => "opus/48000/2",
            CodecKind::G722 => "G722/8000",
            CodecKind::Pcma => "PCMA/8000",
            CodecKind::Pcmu => "PCMU/8000",
        }
    }

    /// Static RTP payload type, if the codec has one.
    pub fn static_payload_type(self) -> Option<u8> {
        match self {
            CodecKind::Opus => None,
            CodecKind::G722 => Some(9),
            CodecKind::Pcma => Some(8),
            CodecKind::Pcmu => Some(0),
        }
    }

    /// Preferred payload type for offers (dynamic codecs get 96).
    pub fn default_payload_type(self) -> u8 {
        self.static_payload_type().unwrap_or(96)
    }

    /// Native audio sample rate.
    pub fn sample_rate(self) -> u32 {
        match self {
            CodecKind::Opus => 48_000,
            CodecKind::G722 => 16_000,
            CodecKind::Pcma | CodecKind::Pcmu => 8_000,
        }
    }

    /// RTP timestamp clock rate.
    pub fn rtp_clock_rate(self) -> u32 {
        match self {
            CodecKind::Opus => 48_000,
            // 8000 by RFC 3551 despite 16 kHz audio.
            CodecKind::G722 => 8_000,
            CodecKind::Pcma | CodecKind::Pcmu => 8_000,
        }
    }

    /// RTP timestamp increment per 20 ms frame.
    pub fn timestamp_step(self) -> u32 {
        self.rtp_clock_rate() / 50
    }

    /// PCM16 samples per 20 ms frame at the native audio rate.
    pub fn samples_per_frame(self) -> usize {
        (self.sample_rate() / 50) as usize
    }

    /// Instantiate the codec with fresh state.
    pub fn create(self) -> Result<Box<dyn AudioCodec>> {
        tracing::debug!("creating {:?} codec ({} Hz)", self, self.sample_rate());
        Ok(match self {
            CodecKind::Opus => Box::new(OpusCodec::new()?),
            CodecKind::G722 => Box::new(G722Codec::new()),
            CodecKind::Pcma => Box::new(G711Codec::new(G711Variant::ALaw)),
            CodecKind::Pcmu => Box::new(G711Codec::new(G711Variant::MuLaw)),
        })
    }
}
