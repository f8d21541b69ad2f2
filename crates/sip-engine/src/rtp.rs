//! RTP media session: the 20 ms send pump and the receive loop.
//!
//! The pump never stalls the RTP clock: an empty bridge queue produces
//! a silence frame. Incoming packets are decoded at the negotiated
//! codec rate and resampled to 48 kHz before they reach the event
//! channel (`try_send`; a slow consumer drops frames, not the clock).

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use voxgate_media_core::{
    bytes_to_samples, resample, samples_to_bytes, CodecKind, RtpPacket, SAMPLE_RATE_SIP,
};

use crate::bridge::{AudioBridgePort, FRAME_BYTES};
use crate::error::{Result, SipEngineError};
use crate::events::{CallHandle, SipEngineEvent};

/// Bind an RTP socket on the first free even port in the range.
pub async fn bind_rtp_socket(
    local_ip: IpAddr,
    start: u16,
    end: u16,
) -> Result<UdpSocket> {
    let mut port = if start % 2 == 0 { start } else { start + 1 };
    while port <= end {
        match UdpSocket::bind(SocketAddr::new(local_ip, port)).await {
            Ok(socket) => {
                debug!("RTP socket bound on port {}", port);
                return Ok(socket);
            }
            Err(_) => port += 2,
        }
    }
    Err(SipEngineError::RtpPortsExhausted { start, end })
}

/// Parameters for one media session.
pub struct RtpSessionParams {
    pub call: CallHandle,
    pub socket: UdpSocket,
    pub remote: SocketAddr,
    pub codec: CodecKind,
    pub payload_type: u8,
    pub bridge: Arc<AudioBridgePort>,
    pub events: mpsc::Sender<SipEngineEvent>,
    pub media_timeout: Duration,
}

/// Spawn the send pump and receive loop for a negotiated stream.
///
/// Returns the task handles (owned by the dialog) so teardown can
/// abort them, plus a receiver that fires once if RTP goes silent for
/// longer than the media timeout.
pub fn spawn_media_tasks(
    params: RtpSessionParams,
) -> Result<(Vec<JoinHandle<()>>, mpsc::Receiver<()>)> {
    let RtpSessionParams {
        call,
        socket,
        remote,
        codec,
        payload_type,
        bridge,
        events,
        media_timeout,
    } = params;

    let socket = Arc::new(socket);
    let mut encoder = codec.create()?;
    let mut decoder = codec.create()?;
    let (timeout_tx, timeout_rx) = mpsc::channel(1);

    let codec_rate = codec.sample_rate();
    let frame_samples = codec.samples_per_frame();
    let ts_step = codec.timestamp_step();
    let ssrc: u32 = rand::random();
    let mut sequence: u16 = rand::random();
    let mut timestamp: u32 = rand::random();

    // --- Send pump: one frame every 20 ms, silence on underflow. ---
    let send_socket = Arc::clone(&socket);
    let send_bridge = Arc::clone(&bridge);
    let send_call = call.clone();
    let sender = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let silence = Bytes::from(vec![0u8; FRAME_BYTES]);
        let mut first_audio_sent = false;
        let mut tx_frames: u64 = 0;

        loop {
            ticker.tick().await;

            let (frame, is_audio) = match send_bridge.pop_frame() {
                Some(f) => (f, true),
                None => (silence.clone(), false),
            };

            if is_audio && !first_audio_sent {
                first_audio_sent = true;
                info!("[TX] first AI audio frame on {}", send_call);
            }

            // 48 kHz bridge frame -> codec rate -> payload.
            let native = resample(&frame, SAMPLE_RATE_SIP, codec_rate);
            let samples = match bytes_to_samples(&native) {
                Ok(s) => s,
                Err(e) => {
                    warn!("[TX] dropping malformed frame: {}", e);
                    continue;
                }
            };
            if samples.len() != frame_samples {
                // Resampler output is exact for the fixed rates in use;
                // anything else would desync the codec state.
                warn!(
                    "[TX] unexpected frame length {} (wanted {})",
                    samples.len(),
                    frame_samples
                );
                continue;
            }

            let payload = match encoder.encode(&samples) {
                Ok(p) => p,
                Err(e) => {
                    warn!("[TX] encode failed: {}", e);
                    continue;
                }
            };

            sequence = sequence.wrapping_add(1);
            timestamp = timestamp.wrapping_add(ts_step);
            let packet = RtpPacket {
                payload_type,
                marker: tx_frames == 0,
                sequence,
                timestamp,
                ssrc,
                payload,
            };
            tx_frames += 1;

            if let Err(e) = send_socket.send_to(&packet.to_bytes(), remote).await {
                warn!("[TX] RTP send failed: {}", e);
            }
            if tx_frames % 500 == 0 {
                trace!("[TX] {} frames sent, queue {}", tx_frames, send_bridge.queued_frames());
            }
        }
    });

    // --- Receive loop: decode, upsample to 48 kHz, emit. ---
    let recv_call = call.clone();
    let dropped = Arc::new(AtomicU64::new(0));
    let receiver = tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        let mut rx_frames: u64 = 0;

        loop {
            let received =
                tokio::time::timeout(media_timeout, socket.recv_from(&mut buf)).await;

            let (len, from) = match received {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    warn!("[RX] RTP socket error: {}", e);
                    break;
                }
                Err(_) => {
                    if rx_frames > 0 {
                        warn!(
                            "[RX] no RTP for {:?} on {}, flagging media timeout",
                            media_timeout, recv_call
                        );
                        let _ = timeout_tx.try_send(());
                        break;
                    }
                    // Nothing has arrived yet; some trunks clamp the
                    // stream until the 200 is ACKed.
                    continue;
                }
            };

            // Latched to the negotiated peer; drop strays.
            if from.ip() != remote.ip() {
                continue;
            }

            let packet = match RtpPacket::parse(&buf[..len]) {
                Ok(p) => p,
                Err(e) => {
                    trace!("[RX] ignoring malformed packet: {}", e);
                    continue;
                }
            };
            if packet.payload_type != payload_type {
                // Comfort noise and other exotica.
                continue;
            }

            let samples = match decoder.decode(&packet.payload) {
                Ok(s) => s,
                Err(e) => {
                    trace!("[RX] decode failed: {}", e);
                    continue;
                }
            };

            rx_frames += 1;
            if rx_frames == 1 {
                info!("[RX] first caller audio frame on {}", recv_call);
            }
            if rx_frames % 500 == 0 {
                trace!("[RX] {} frames received", rx_frames);
            }

            let pcm48 = resample(&samples_to_bytes(&samples), codec_rate, SAMPLE_RATE_SIP);
            let event = SipEngineEvent::AudioReceived {
                call: recv_call.clone(),
                pcm48: Bytes::from(pcm48),
            };
            if events.try_send(event).is_err() {
                let n = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n % 100 == 1 {
                    warn!("[RX] event channel full, dropped {} audio frames", n);
                }
            }
        }
    });

    Ok((vec![sender, receiver], timeout_rx))
}
