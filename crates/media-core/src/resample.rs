//! Sample-rate conversion between the SIP bridge and the AI session.
//!
//! The conversions are pure functions over PCM16 bytes. Equal rates are
//! an identity (bit-exact); everything else goes through a two-point
//! averaging pre-filter and linear interpolation, which is adequate for
//! telephony speech and keeps the hot path allocation-light.

use crate::pcm::{bytes_to_samples, samples_to_bytes};
use crate::{SAMPLE_RATE_AI_INPUT, SAMPLE_RATE_AI_OUTPUT, SAMPLE_RATE_SIP};

/// Resample PCM16 mono audio from `from_rate` to `to_rate`.
///
/// Output length is `floor(in_samples * to_rate / from_rate)` samples.
/// Identical rates return the input unchanged.
pub fn resample(audio: &[u8], from_rate: u32, to_rate: u32) -> Vec<u8> {
    if from_rate == to_rate {
        return audio.to_vec();
    }

    let samples = match bytes_to_samples(audio) {
        Ok(s) => s,
        // Trailing odd byte cannot happen on the framed paths; drop it.
        Err(_) => {
            let trimmed = &audio[..audio.len() - 1];
            bytes_to_samples(trimmed).unwrap_or_default()
        }
    };
    if samples.is_empty() {
        return Vec::new();
    }

    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut out = Vec::with_capacity(out_len);

    // When decimating, average neighbouring input samples first so the
    // worst of the aliasing energy is knocked down before interpolation.
    let filtered: Vec<f32> = if to_rate < from_rate {
        let mut f = Vec::with_capacity(samples.len());
        f.push(samples[0] as f32);
        for w in samples.windows(2) {
            f.push((w[0] as f32 + w[1] as f32) * 0.5);
        }
        f
    } else {
        samples.iter().map(|&s| s as f32).collect()
    };

    let step = from_rate as f64 / to_rate as f64;
    for n in 0..out_len {
        let pos = n as f64 * step;
        let idx = pos as usize;
        let frac = (pos - idx as f64) as f32;
        let a = filtered[idx.min(filtered.len() - 1)];
        let b = filtered[(idx + 1).min(filtered.len() - 1)];
        let v = a + (b - a) * frac;
        out.push(v.round().clamp(-32768.0, 32767.0) as i16);
    }

    samples_to_bytes(&out)
}

/// Convert caller audio from the SIP bridge (48 kHz) to AI input (16 kHz).
pub fn sip_to_ai_input(audio: &[u8]) -> Vec<u8> {
    resample(audio, SAMPLE_RATE_SIP, SAMPLE_RATE_AI_INPUT)
}

/// Convert AI output (24 kHz) to the SIP bridge rate (48 kHz).
pub fn ai_output_to_sip(audio: &[u8]) -> Vec<u8> {
    resample(audio, SAMPLE_RATE_AI_OUTPUT, SAMPLE_RATE_SIP)
}
