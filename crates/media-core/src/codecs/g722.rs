//! G.722 wideband codec (64 kbit/s mode).
//!
//! Two-subband ADPCM: a 24-tap QMF splits the 16 kHz input into two
//! 8 kHz bands, the lower band is coded with 6 bits and the upper with
//! 2 bits per sample. One 20 ms frame is 320 samples in and 160 bytes
//! out. Only mode 1 (64 kbit/s) is implemented; that is the only mode
//! SIP trunks negotiate.

use crate::codecs::{AudioCodec, CodecKind};
use crate::error::{MediaError, Result};

// Quantizer decision levels for the 6-bit low band.
const Q6: [i32; 31] = [
    0, 35, 72, 110, 150, 190, 233, 276, 323, 370, 422, 473, 530, 587, 650, 714, 786, 858, 940,
    1023, 1121, 1219, 1339, 1458, 1612, 1765, 1980, 2195, 2557, 2919, 3200,
];
const ILN: [i32; 31] = [
    0, 63, 62, 31, 30, 29, 28, 27, 26, 25, 24, 23, 22, 21, 20, 19, 18, 17, 16, 15, 14, 13, 12, 11,
    10, 9, 8, 7, 6, 5, 4,
];
const ILP: [i32; 31] = [
    0, 61, 60, 59, 58, 57, 56, 55, 54, 53, 52, 51, 50, 49, 48, 47, 46, 45, 44, 43, 42, 41, 40, 39,
    38, 37, 36, 35, 34, 33, 32,
];
const WL: [i32; 8] = [-60, -30, 58, 172, 334, 538, 1198, 3042];
const RL42: [i32; 16] = [0, 7, 6, 5, 4, 3, 2, 1, 7, 6, 5, 4, 3, 2, 1, 0];
const ILB: [i32; 32] = [
    2048, 2093, 2139, 2186, 2233, 2282, 2332, 2383, 2435, 2489, 2543, 2599, 2656, 2714, 2774,
    2834, 2896, 2960, 3025, 3091, 3158, 3228, 3298, 3371, 3444, 3520, 3597, 3676, 3756, 3838,
    3922, 4008,
];
const QM4: [i32; 16] = [
    0, -20456, -12896, -8968, -6288, -4240, -2584, -1200, 20456, 12896, 8968, 6288, 4240, 2584,
    1200, 0,
];
const QM2: [i32; 4] = [-7408, -1616, 7408, 1616];
const QM6: [i32; 64] = [
    -136, -136, -136, -136, -24808, -21904, -19008, -16704, -14984, -13512, -12280, -11192,
    -10232, -9360, -8576, -7856, -7192, -6576, -6000, -5456, -4944, -4464, -4008, -3576, -3168,
    -2776, -2400, -2032, -1688, -1360, -1040, -728, 24808, 21904, 19008, 16704, 14984, 13512,
    12280, 11192, 10232, 9360, 8576, 7856, 7192, 6576, 6000, 5456, 4944, 4464, 4008, 3576, 3168,
    2776, 2400, 2032, 1688, 1360, 1040, 728, 432, 136, -432, -136,
];
const IHN: [i32; 3] = [0, 1, 0];
const IHP: [i32; 3] = [0, 3, 2];
const WH: [i32; 3] = [0, -214, 798];
const RH2: [i32; 4] = [2, 1, 2, 1];
const QMF_COEFFS: [i32; 12] = [3, -11, 12, 32, -210, 951, 3876, -805, 362, -156, 53, -11];

fn saturate(v: i32) -> i32 {
    v.clamp(-32768, 32767)
}

/// Per-band ADPCM predictor state.
#[derive(Debug, Clone)]
struct Band {
    s: i32,
    sp: i32,
    sz: i32,
    r: [i32; 3],
    a: [i32; 3],
    ap: [i32; 3],
    p: [i32; 3],
    d: [i32; 7],
    b: [i32; 7],
    bp: [i32; 7],
    sg: [i32; 7],
    nb: i32,
    det: i32,
}

impl Band {
    fn new(det: i32) -> Self {
        Band {
            s: 0,
            sp: 0,
            sz: 0,
            r: [0; 3],
            a: [0; 3],
            ap: [0; 3],
            p: [0; 3],
            d: [0; 7],
            b: [0; 7],
            bp: [0; 7],
            sg: [0; 7],
            nb: 0,
            det,
        }
    }

    /// Predictor adaptation (ITU "block 4"), shared by encoder and
    /// decoder, low and high band.
    fn block4(&mut self, d: i32) {
        // RECONS / PARREC
        self.d[0] = d;
        self.r[0] = saturate(self.s + d);
        self.p[0] = saturate(self.sz + d);

        // UPPOL2
        for i in 0..3 {
            self.sg[i] = self.p[i] >> 15;
        }
        let wd1 = saturate(self.a[1] << 2);
        let mut wd2 = if self.sg[0] == self.sg[1] { -wd1 } else { wd1 };
        if wd2 > 32767 {
            wd2 = 32767;
        }
        let mut wd3 = if self.sg[0] == self.sg[2] { 128 } else { -128 };
        wd3 += wd2 >> 7;
        wd3 += (self.a[2] * 32512) >> 15;
        self.ap[2] = wd3.clamp(-12288, 12288);

        // UPPOL1
        self.sg[0] = self.p[0] >> 15;
        self.sg[1] = self.p[1] >> 15;
        let wd1 = if self.sg[0] == self.sg[1] { 192 } else { -192 };
        let wd2 = (self.a[1] * 32640) >> 15;
        self.ap[1] = saturate(wd1 + wd2);
        let wd3 = saturate(15360 - self.ap[2]);
        self.ap[1] = self.ap[1].clamp(-wd3, wd3);

        // UPZERO
        let wd1 = if d == 0 { 0 } else { 128 };
        self.sg[0] = d >> 15;
        for i in 1..7 {
            self.sg[i] = self.d[i] >> 15;
            let wd2 = if self.sg[i] == self.sg[0] { wd1 } else { -wd1 };
            let wd3 = (self.b[i] * 32640) >> 15;
            self.bp[i] = saturate(wd2 + wd3);
        }

        // DELAYA
        for i in (1..7).rev() {
            self.d[i] = self.d[i - 1];
            self.b[i] = self.bp[i];
        }
        for i in (1..3).rev() {
            self.r[i] = self.r[i - 1];
            self.p[i] = self.p[i - 1];
            self.a[i] = self.ap[i];
        }

        // FILTEP
        let wd1 = saturate(self.r[1] + self.r[1]);
        let wd1 = (self.a[1] * wd1) >> 15;
        let wd2 = saturate(self.r[2] + self.r[2]);
        let wd2 = (self.a[2] * wd2) >> 15;
        self.sp = saturate(wd1 + wd2);

        // FILTEZ
        let mut sz = 0;
        for i in (1..7).rev() {
            let wd1 = saturate(self.d[i] + self.d[i]);
            sz += (self.b[i] * wd1) >> 15;
        }
        self.sz = saturate(sz);

        // PREDIC
        self.s = saturate(self.sp + self.sz);
    }

    /// Log-domain scale factor update and new quantizer step (low band).
    fn scale_low(&mut self, il4: i32) {
        let wd = (self.nb * 127) >> 7;
        self.nb = (wd + WL[il4 as usize]).clamp(0, 18432);
        let wd1 = ((self.nb >> 6) & 31) as usize;
        let wd2 = 8 - (self.nb >> 11);
        let wd3 = if wd2 < 0 {
            ILB[wd1] << -wd2
        } else {
            ILB[wd1] >> wd2
        };
        self.det = wd3 << 2;
    }

    /// Log-domain scale factor update and new quantizer step (high band).
    fn scale_high(&mut self, ih2: i32) {
        let wd = (self.nb * 127) >> 7;
        self.nb = (wd + WH[ih2 as usize]).clamp(0, 22528);
        let wd1 = ((self.nb >> 6) & 31) as usize;
        let wd2 = 10 - (self.nb >> 11);
        let wd3 = if wd2 < 0 {
            ILB[wd1] << -wd2
        } else {
            ILB[wd1] >> wd2
        };
        self.det = wd3 << 2;
    }
}

/// Stateful G.722 encoder/decoder pair.
pub struct G722Codec {
    enc_low: Band,
    enc_high: Band,
    enc_qmf: [i32; 24],
    dec_low: Band,
    dec_high: Band,
    dec_qmf: [i32; 24],
}

impl G722Codec {
    pub fn new() -> Self {
        G722Codec {
            enc_low: Band::new(32),
            enc_high: Band::new(8),
            enc_qmf: [0; 24],
            dec_low: Band::new(32),
            dec_high: Band::new(8),
            dec_qmf: [0; 24],
        }
    }

    fn encode_pair(&mut self, s0: i16, s1: i16) -> u8 {
        // Transmit QMF: split one pair of 16 kHz samples into one
        // low-band and one high-band 8 kHz sample.
        self.enc_qmf.copy_within(2.., 0);
        self.enc_qmf[22] = s0 as i32;
        self.enc_qmf[23] = s1 as i32;

        let mut sumodd = 0i64;
        let mut sumeven = 0i64;
        for i in 0..12 {
            sumodd += (self.enc_qmf[2 * i] * QMF_COEFFS[i]) as i64;
            sumeven += (self.enc_qmf[2 * i + 1] * QMF_COEFFS[11 - i]) as i64;
        }
        let xlow = ((sumeven + sumodd) >> 14) as i32;
        let xhigh = ((sumeven - sumodd) >> 14) as i32;

        // Low band: 6-bit quantization.
        let el = saturate(xlow - self.enc_low.s);
        let wd = if el >= 0 { el } else { -(el + 1) };
        let mut i = 1;
        while i < 30 {
            let decision = (Q6[i] * self.enc_low.det) >> 12;
            if wd < decision {
                break;
            }
            i += 1;
        }
        let ilow = if el < 0 { ILN[i] } else { ILP[i] };

        let ril = ilow >> 2;
        let dlow = (self.enc_low.det * QM4[ril as usize]) >> 15;
        self.enc_low.scale_low(RL42[ril as usize]);
        self.enc_low.block4(dlow);

        // High band: 2-bit quantization.
        let eh = saturate(xhigh - self.enc_high.s);
        let wd = if eh >= 0 { eh } else { -(eh + 1) };
        let decision = (564 * self.enc_high.det) >> 12;
        let mih = if wd >= decision { 2 } else { 1 };
        let ihigh = if eh < 0 { IHN[mih] } else { IHP[mih] };

        let dhigh = (self.enc_high.det * QM2[ihigh as usize]) >> 15;
        self.enc_high.scale_high(RH2[ihigh as usize]);
        self.enc_high.block4(dhigh);

        (((ihigh << 6) | ilow) & 0xFF) as u8
    }

    fn decode_octet(&mut self, code: u8) -> (i16, i16) {
        let ilow = (code & 0x3F) as usize;
        let ihigh = ((code >> 6) & 0x03) as usize;

        // Low band.
        let wd2 = (self.dec_low.det * QM6[ilow]) >> 15;
        let rlow = (self.dec_low.s + wd2).clamp(-16384, 16383);

        let dlow = (self.dec_low.det * QM4[ilow >> 2]) >> 15;
        self.dec_low.scale_low(RL42[ilow >> 2]);
        self.dec_low.block4(dlow);

        // High band.
        let dhigh = (self.dec_high.det * QM2[ihigh]) >> 15;
        let rhigh = (dhigh + self.dec_high.s).clamp(-16384, 16383);
        self.dec_high.scale_high(RH2[ihigh]);
        self.dec_high.block4(dhigh);

        // Receive QMF: recombine the band samples into two 16 kHz samples.
        self.dec_qmf.copy_within(2.., 0);
        self.dec_qmf[22] = rlow + rhigh;
        self.dec_qmf[23] = rlow - rhigh;

        let mut sumodd = 0i64;
        let mut sumeven = 0i64;
        for i in 0..12 {
            sumodd += (self.dec_qmf[2 * i] * QMF_COEFFS[i]) as i64;
            sumeven += (self.dec_qmf[2 * i + 1] * QMF_COEFFS[11 - i]) as i64;
        }
        (
            saturate((sumodd >> 11) as i32) as i16,
            saturate((sumeven >> 11) as i32) as i16,
        )
    }
}

impl AudioCodec for G722Codec {
    fn kind(&self) -> CodecKind {
        CodecKind::G722
    }

    fn encode(&mut self, samples: &[i16]) -> Result<Vec<u8>> {
        if samples.len() % 2 != 0 {
            return Err(MediaError::InvalidFrameSize {
                expected: CodecKind::G722.samples_per_frame(),
                actual: samples.len(),
            });
        }
        let mut out = Vec::with_capacity(samples.len() / 2);
        for pair in samples.chunks_exact(2) {
            out.push(self.encode_pair(pair[0], pair[1]));
        }
        Ok(out)
    }

    fn decode(&mut self, payload: &[u8]) -> Result<Vec<i16>> {
        let mut out = Vec::with_capacity(payload.len() * 2);
        for &code in payload {
            let (a, b) = self.decode_octet(code);
            out.push(a);
            out.push(b);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_16k(freq: f32, samples: usize) -> Vec<i16> {
        (0..samples)
            .map(|n| {
                let t = n as f32 / 16_000.0;
                ((t * freq * 2.0 * std::f32::consts::PI).sin() * 10000.0) as i16
            })
            .collect()
    }

    #[test]
    fn frame_sizes_are_2_to_1() {
        let mut codec = G722Codec::new();
        let frame = sine_16k(440.0, 320);
        let encoded = codec.encode(&frame).unwrap();
        assert_eq!(encoded.len(), 160);
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded.len(), 320);
    }

    #[test]
    fn rejects_odd_sample_count() {
        let mut codec = G722Codec::new();
        assert!(codec.encode(&[0i16; 321]).is_err());
    }

    #[test]
    fn round_trip_preserves_speech_band_energy() {
        let mut enc = G722Codec::new();
        let mut dec = G722Codec::new();
        let input = sine_16k(440.0, 3200); // 200 ms, lets ADPCM settle
        let mut decoded = Vec::new();
        for frame in input.chunks(320) {
            let bytes = enc.encode(frame).unwrap();
            decoded.extend(dec.decode(&bytes).unwrap());
        }
        // Skip adaptation warm-up and the QMF group delay, then compare RMS.
        let tail_in = &input[1600..3100];
        let tail_out = &decoded[1600..3100];
        let rms = |s: &[i16]| {
            (s.iter().map(|&v| (v as f64).powi(2)).sum::<f64>() / s.len() as f64).sqrt()
        };
        let (rin, rout) = (rms(tail_in), rms(tail_out));
        assert!(
            (rout / rin) > 0.5 && (rout / rin) < 2.0,
            "rms in={:.0} out={:.0}",
            rin,
            rout
        );
    }

    #[test]
    fn silence_encodes_to_stable_output() {
        let mut enc = G722Codec::new();
        let mut dec = G722Codec::new();
        let bytes = enc.encode(&[0i16; 320]).unwrap();
        let decoded = dec.decode(&bytes).unwrap();
        let peak = decoded.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak < 100, "silence decoded with peak {}", peak);
    }
}
