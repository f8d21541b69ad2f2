//! Audio primitives for the voxgate media path.
//!
//! Everything here is PCM16 little-endian mono. The SIP bridge runs at
//! 48 kHz with 20 ms frames; the AI ingests 16 kHz and produces 24 kHz.
//! This crate provides the conversions between those worlds plus the
//! trunk codecs (Opus, G.722, PCMA, PCMU) and the RTP packet codec.

pub mod codecs;
pub mod error;
pub mod pcm;
pub mod resample;
pub mod rtp;
pub mod tone;

pub use codecs::{
    alaw_decode, alaw_encode, ulaw_decode, ulaw_encode, AudioCodec, CodecKind,
};
pub use error::{MediaError, Result};
pub use pcm::{bytes_to_samples, samples_to_bytes};
pub use resample::{ai_output_to_sip, resample, sip_to_ai_input};
pub use rtp::RtpPacket;
pub use tone::beep_pcm48;

/// Sample rate on the SIP side of the bridge.
pub const SAMPLE_RATE_SIP: u32 = 48_000;
/// Sample rate the AI expects on input.
pub const SAMPLE_RATE_AI_INPUT: u32 = 16_000;
/// Sample rate the AI produces on output.
pub const SAMPLE_RATE_AI_OUTPUT: u32 = 24_000;

/// Frame duration on the SIP side.
pub const FRAME_MS: u32 = 20;

/// Samples per 20 ms frame at the given rate.
pub const fn samples_per_frame(rate: u32) -> usize {
    (rate / 1000 * FRAME_MS) as usize
}

/// Bytes per 20 ms PCM16 frame at the given rate.
pub const fn bytes_per_frame(rate: u32) -> usize {
    samples_per_frame(rate) * 2
}
