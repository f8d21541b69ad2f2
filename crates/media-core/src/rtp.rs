//! RTP packet encoding/decoding (RFC 3550, version 2).
//!
//! Only what the trunk media path needs: fixed header with optional
//! CSRC list, marker/payload type, sequence/timestamp/SSRC. Extensions
//! are skipped on parse and never emitted.

use crate::error::{MediaError, Result};

const RTP_VERSION: u8 = 2;
const MIN_HEADER_LEN: usize = 12;

/// A parsed (or to-be-sent) RTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub payload_type: u8,
    pub marker: bool,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MIN_HEADER_LEN + self.payload.len());
        out.push(RTP_VERSION << 6);
        out.push((self.payload_type & 0x7F) | if self.marker { 0x80 } else { 0 });
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a datagram into an RTP packet.
    pub fn parse(data: &[u8]) -> Result<RtpPacket> {
        if data.len() < MIN_HEADER_LEN {
            return Err(MediaError::MalformedPacket {
                details: format!("datagram too short: {} bytes", data.len()),
            });
        }

        let version = data[0] >> 6;
        if version != RTP_VERSION {
            return Err(MediaError::MalformedPacket {
                details: format!("unsupported RTP version {}", version),
            });
        }

        let has_padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;

        let mut offset = MIN_HEADER_LEN + csrc_count * 4;
        if data.len() < offset {
            return Err(MediaError::MalformedPacket {
                details: "truncated CSRC list".into(),
            });
        }

        if has_extension {
            if data.len() < offset + 4 {
                return Err(MediaError::MalformedPacket {
                    details: "truncated extension header".into(),
                });
            }
            let ext_words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + ext_words * 4;
            if data.len() < offset {
                return Err(MediaError::MalformedPacket {
                    details: "truncated extension body".into(),
                });
            }
        }

        let mut end = data.len();
        if has_padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(MediaError::MalformedPacket {
                    details: "invalid padding length".into(),
                });
            }
            end -= pad;
        }

        Ok(RtpPacket {
            payload_type: data[1] & 0x7F,
            marker: data[1] & 0x80 != 0,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            payload: data[offset..end].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_packet() {
        let pkt = RtpPacket {
            payload_type: 9,
            marker: true,
            sequence: 4711,
            timestamp: 160_000,
            ssrc: 0xDEADBEEF,
            payload: vec![1, 2, 3, 4],
        };
        let parsed = RtpPacket::parse(&pkt.to_bytes()).unwrap();
        assert_eq!(parsed, pkt);
    }

    #[test]
    fn skips_csrc_and_extension() {
        let mut data = vec![
            (2 << 6) | 0x10 | 1, // version 2, extension, 1 CSRC
            0,                   // PT 0, no marker
            0, 1, // seq
            0, 0, 0, 2, // timestamp
            0, 0, 0, 3, // ssrc
            9, 9, 9, 9, // csrc
            0, 0, 0, 1, // extension header: 1 word
            8, 8, 8, 8, // extension body
        ];
        data.extend_from_slice(&[0x55, 0x66]);
        let pkt = RtpPacket::parse(&data).unwrap();
        assert_eq!(pkt.payload, vec![0x55, 0x66]);
    }

    #[test]
    fn rejects_wrong_version() {
        let mut data = vec![0u8; 14];
        data[0] = 1 << 6;
        assert!(RtpPacket::parse(&data).is_err());
    }

    #[test]
    fn strips_padding() {
        let mut data = RtpPacket {
            payload_type: 8,
            marker: false,
            sequence: 1,
            timestamp: 2,
            ssrc: 3,
            payload: vec![7, 7],
        }
        .to_bytes();
        data[0] |= 0x20;
        data.extend_from_slice(&[0, 0, 3]); // 3 bytes of padding
        let pkt = RtpPacket::parse(&data).unwrap();
        assert_eq!(pkt.payload, vec![7, 7]);
    }
}
