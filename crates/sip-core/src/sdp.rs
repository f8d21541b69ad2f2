//! Minimal SDP offer/answer model for a single audio stream.
//!
//! Covers the subset a trunk answer needs: origin, connection address,
//! one `m=audio` section with its payload formats and `rtpmap`
//! attributes. Everything else in the offer is ignored but tolerated.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::IpAddr;

use crate::error::{Result, SipCoreError};

/// One `m=` section of a session description.
#[derive(Debug, Clone)]
pub struct SdpMedia {
    /// Media kind (`audio`, `video`, ...).
    pub kind: String,
    /// Transport port from the `m=` line.
    pub port: u16,
    /// Transport protocol (`RTP/AVP`).
    pub protocol: String,
    /// Payload type numbers in offer order.
    pub formats: Vec<u8>,
    /// `rtpmap` attribute per payload type: `96 → "opus/48000/2"`.
    pub rtpmap: HashMap<u8, String>,
    /// Connection address overriding the session-level one, if present.
    pub connection: Option<IpAddr>,
}

impl SdpMedia {
    /// Find the payload type whose rtpmap encoding name matches
    /// `encoding` (case-insensitive, name part only).
    ///
    /// Static payload types without an explicit rtpmap fall back to
    /// their RFC 3551 assignments (0=PCMU, 8=PCMA, 9=G722).
    pub fn payload_type_for(&self, encoding: &str) -> Option<u8> {
        for pt in &self.formats {
            let name = match self.rtpmap.get(pt) {
                Some(map) => map.split('/').next().unwrap_or(""),
                None => match pt {
                    0 => "PCMU",
                    8 => "PCMA",
                    9 => "G722",
                    _ => continue,
                },
            };
            if name.eq_ignore_ascii_case(encoding) {
                return Some(*pt);
            }
        }
        None
    }
}

/// A parsed session description.
#[derive(Debug, Clone)]
pub struct SdpSession {
    /// Session-level connection address (`c=` line).
    pub connection: Option<IpAddr>,
    /// Media sections in offer order.
    pub media: Vec<SdpMedia>,
}

impl SdpSession {
    /// Parse an SDP body.
    pub fn parse(body: &str) -> Result<SdpSession> {
        let mut connection = None;
        let mut media: Vec<SdpMedia> = Vec::new();

        for line in body.lines() {
            let line = line.trim_end();
            if line.len() < 2 || line.as_bytes()[1] != b'=' {
                continue;
            }
            let (kind, value) = (line.as_bytes()[0], &line[2..]);

            match kind {
                b'c' => {
                    let addr = parse_connection(value)?;
                    match media.last_mut() {
                        Some(m) => m.connection = Some(addr),
                        None => connection = Some(addr),
                    }
                }
                b'm' => {
                    media.push(parse_media_line(value)?);
                }
                b'a' => {
                    if let Some(m) = media.last_mut() {
                        if let Some(rest) = value.strip_prefix("rtpmap:") {
                            let mut parts = rest.splitn(2, ' ');
                            if let (Some(pt), Some(map)) = (parts.next(), parts.next()) {
                                if let Ok(pt) = pt.parse::<u8>() {
                                    m.rtpmap.insert(pt, map.trim().to_string());
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        if media.is_empty() {
            return Err(SipCoreError::sdp("no media section"));
        }

        Ok(SdpSession { connection, media })
    }

    /// First audio section, if any.
    pub fn audio(&self) -> Option<&SdpMedia> {
        self.media.iter().find(|m| m.kind == "audio")
    }

    /// Effective remote RTP endpoint for the first audio section.
    pub fn audio_endpoint(&self) -> Option<(IpAddr, u16)> {
        let audio = self.audio()?;
        let addr = audio.connection.or(self.connection)?;
        Some((addr, audio.port))
    }
}

fn parse_connection(value: &str) -> Result<IpAddr> {
    // "IN IP4 217.10.79.9" / "IN IP6 2001:db8::1"
    let addr = value
        .split_whitespace()
        .nth(2)
        .ok_or_else(|| SipCoreError::sdp(format!("bad c-line: {}", value)))?;
    addr.parse()
        .map_err(|_| SipCoreError::sdp(format!("bad connection address: {}", addr)))
}

fn parse_media_line(value: &str) -> Result<SdpMedia> {
    // "audio 40002 RTP/AVP 96 9 8 0"
    let mut parts = value.split_whitespace();
    let kind = parts
        .next()
        .ok_or_else(|| SipCoreError::sdp("empty m-line"))?
        .to_string();
    let port = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| SipCoreError::sdp(format!("bad media port in: {}", value)))?;
    let protocol = parts
        .next()
        .ok_or_else(|| SipCoreError::sdp("m-line missing protocol"))?
        .to_string();
    let formats = parts.filter_map(|p| p.parse().ok()).collect();

    Ok(SdpMedia {
        kind,
        port,
        protocol,
        formats,
        rtpmap: HashMap::new(),
        connection: None,
    })
}

/// Build an audio-only answer (or offer) advertising `codecs` in order.
///
/// `codecs` pairs a payload type with its rtpmap encoding
/// (`(96, "opus/48000/2")`). `addr` is the address published in the
/// o-/c-lines; with NAT this must be the configured public address.
pub fn build_audio_sdp(addr: IpAddr, rtp_port: u16, codecs: &[(u8, &str)]) -> String {
    let ip_kind = match addr {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    };
    let session_id = rand::random::<u32>();

    let mut out = String::new();
    let _ = writeln!(out, "v=0\r");
    let _ = writeln!(
        out,
        "o=voxgate {} {} IN {} {}\r",
        session_id, session_id, ip_kind, addr
    );
    let _ = writeln!(out, "s=voxgate\r");
    let _ = writeln!(out, "c=IN {} {}\r", ip_kind, addr);
    let _ = writeln!(out, "t=0 0\r");

    let pts: Vec<String> = codecs.iter().map(|(pt, _)| pt.to_string()).collect();
    let _ = writeln!(out, "m=audio {} RTP/AVP {}\r", rtp_port, pts.join(" "));
    for (pt, map) in codecs {
        let _ = writeln!(out, "a=rtpmap:{} {}\r", pt, map);
    }
    let _ = writeln!(out, "a=sendrecv\r");
    out
}
