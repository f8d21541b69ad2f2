//! Pre-generated signalling tones for the SIP bridge.

use crate::pcm::samples_to_bytes;
use crate::SAMPLE_RATE_SIP;

const BEEP_FREQ_HZ: f32 = 800.0;
const BEEP_DURATION_MS: u32 = 150;
const BEEP_FADE_MS: u32 = 10;
const BEEP_AMPLITUDE: f32 = 12000.0;

/// The security-gate beep: ~150 ms of 800 Hz sine at 48 kHz with a
/// 10 ms linear fade on both ends so it does not click on the trunk.
pub fn beep_pcm48() -> Vec<u8> {
    let total = (SAMPLE_RATE_SIP * BEEP_DURATION_MS / 1000) as usize;
    let fade = (SAMPLE_RATE_SIP * BEEP_FADE_MS / 1000) as usize;

    let samples: Vec<i16> = (0..total)
        .map(|n| {
            let t = n as f32 / SAMPLE_RATE_SIP as f32;
            let envelope = if n < fade {
                n as f32 / fade as f32
            } else if n >= total - fade {
                (total - n) as f32 / fade as f32
            } else {
                1.0
            };
            let v = (t * BEEP_FREQ_HZ * 2.0 * std::f32::consts::PI).sin();
            (v * BEEP_AMPLITUDE * envelope) as i16
        })
        .collect();

    samples_to_bytes(&samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::bytes_to_samples;

    #[test]
    fn beep_is_150ms_at_48k() {
        let beep = beep_pcm48();
        assert_eq!(beep.len() / 2, 7200); // 150 ms * 48 samples/ms
    }

    #[test]
    fn beep_fades_in_and_out() {
        let samples = bytes_to_samples(&beep_pcm48()).unwrap();
        assert_eq!(samples[0], 0);
        // End of fade-in has full amplitude somewhere nearby.
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak > 11_000);
        // Last sample is back near silence.
        assert!(samples[samples.len() - 1].unsigned_abs() < 200);
    }
}
