//! PCM16 little-endian byte/sample conversion.

use crate::error::{MediaError, Result};

/// Interpret a little-endian byte buffer as i16 samples.
pub fn bytes_to_samples(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(MediaError::UnalignedPcm { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect())
}

/// Serialize i16 samples to little-endian bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}
