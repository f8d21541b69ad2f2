//! Opus codec wrapper (48 kHz mono, 20 ms frames, VoIP tuning).

use opus::{Application, Channels};

use crate::codecs::{AudioCodec, CodecKind};
use crate::error::{MediaError, Result};

/// Maximum encoded packet we ask libopus for; 20 ms of mono VoIP audio
/// stays far below this.
const MAX_PACKET: usize = 1500;

/// Stateful Opus encoder/decoder pair at 48 kHz mono.
pub struct OpusCodec {
    encoder: opus::Encoder,
    decoder: opus::Decoder,
}

impl OpusCodec {
    pub fn new() -> Result<Self> {
        let encoder =
            opus::Encoder::new(48_000, Channels::Mono, Application::Voip).map_err(|e| {
                MediaError::InitializationFailed {
                    reason: format!("opus encoder: {}", e),
                }
            })?;
        let decoder = opus::Decoder::new(48_000, Channels::Mono).map_err(|e| {
            MediaError::InitializationFailed {
                reason: format!("opus decoder: {}", e),
            }
        })?;
        Ok(OpusCodec { encoder, decoder })
    }
}

impl AudioCodec for OpusCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Opus
    }

    fn encode(&mut self, samples: &[i16]) -> Result<Vec<u8>> {
        let expected = CodecKind::Opus.samples_per_frame();
        if samples.len() != expected {
            return Err(MediaError::InvalidFrameSize {
                expected,
                actual: samples.len(),
            });
        }
        Ok(self.encoder.encode_vec(samples, MAX_PACKET)?)
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>> {
        // A packet may carry up to 120 ms; size the output for that.
        let mut out = vec![0i16; 5760];
        let samples = self.decoder.decode(payload, &mut out, false)?;
        out.truncate(samples);
        Ok(out)
    }
}
