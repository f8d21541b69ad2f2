//! Audio bridge between the AI session and the RTP pump.
//!
//! One port per call. The AI pushes arbitrarily sized 48 kHz PCM16
//! chunks; the port splits them into exact 20 ms frames and feeds the
//! RTP send pump. Queue and framing buffer live under one lock so
//! barge-in clears both atomically with respect to the pump.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use voxgate_media_core::{bytes_per_frame, SAMPLE_RATE_SIP};

/// Exact frame size on the bridge: 960 samples of PCM16 at 48 kHz.
pub const FRAME_BYTES: usize = bytes_per_frame(SAMPLE_RATE_SIP);

/// Maximum queued frames (~20 s of audio at 20 ms/frame).
pub const MAX_QUEUED_FRAMES: usize = 1000;

#[derive(Default)]
struct BridgeInner {
    /// AI → caller, whole frames.
    queue: VecDeque<Bytes>,
    /// Partial trailing bytes awaiting the next push.
    residual: Vec<u8>,
    /// Oldest-dropped counter for overload visibility.
    dropped: u64,
}

/// Per-call audio bridge port.
pub struct AudioBridgePort {
    inner: Mutex<BridgeInner>,
}

impl AudioBridgePort {
    pub fn new() -> Self {
        AudioBridgePort {
            inner: Mutex::new(BridgeInner::default()),
        }
    }

    /// Enqueue outgoing audio, splitting at 20 ms frame boundaries.
    ///
    /// Partial trailing bytes stay in the residual buffer until the
    /// next push. Beyond [`MAX_QUEUED_FRAMES`] the oldest frame is
    /// dropped; the producer is never blocked.
    pub fn push_audio(&self, pcm48: &[u8]) {
        let mut inner = self.inner.lock();
        inner.residual.extend_from_slice(pcm48);

        let mut queued = 0usize;
        while inner.residual.len() >= FRAME_BYTES {
            let rest = inner.residual.split_off(FRAME_BYTES);
            let frame = std::mem::replace(&mut inner.residual, rest);
            inner.queue.push_back(Bytes::from(frame));
            queued += 1;

            if inner.queue.len() > MAX_QUEUED_FRAMES {
                inner.queue.pop_front();
                inner.dropped += 1;
                if inner.dropped % 100 == 1 {
                    warn!("[TX] outgoing queue full, dropped {} frames", inner.dropped);
                }
            }
        }

        let len = inner.queue.len();
        if len == MAX_QUEUED_FRAMES / 2 {
            warn!("[TX] outgoing queue half full: {}/{}", len, MAX_QUEUED_FRAMES);
        }
        if queued > 10 {
            debug!(
                "[TX] queued {} frames, residual {} bytes",
                queued,
                inner.residual.len()
            );
        }
    }

    /// Pop the next frame for the RTP pump, if any.
    pub fn pop_frame(&self) -> Option<Bytes> {
        self.inner.lock().queue.pop_front()
    }

    /// Barge-in: clear queued frames and the residual buffer atomically.
    /// Returns the number of frames dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.queue.len();
        inner.queue.clear();
        inner.residual.clear();
        count
    }

    /// Currently queued frame count.
    pub fn queued_frames(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Total frames dropped to the overflow policy.
    pub fn dropped_frames(&self) -> u64 {
        self.inner.lock().dropped
    }
}

impl Default for AudioBridgePort {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_pushes_at_frame_boundaries() {
        let port = AudioBridgePort::new();
        // 1.5 frames in one push.
        port.push_audio(&vec![1u8; FRAME_BYTES + FRAME_BYTES / 2]);
        assert_eq!(port.queued_frames(), 1);

        // The other half arrives; the residual completes frame two.
        port.push_audio(&vec![2u8; FRAME_BYTES / 2]);
        assert_eq!(port.queued_frames(), 2);

        let first = port.pop_frame().unwrap();
        assert_eq!(first.len(), FRAME_BYTES);
        assert!(first.iter().all(|&b| b == 1));

        let second = port.pop_frame().unwrap();
        assert_eq!(&second[..FRAME_BYTES / 2], &vec![1u8; FRAME_BYTES / 2][..]);
        assert_eq!(&second[FRAME_BYTES / 2..], &vec![2u8; FRAME_BYTES / 2][..]);
    }

    #[test]
    fn overflow_drops_oldest_never_blocks() {
        let port = AudioBridgePort::new();
        for i in 0..(MAX_QUEUED_FRAMES + 10) {
            let fill = (i % 251) as u8;
            port.push_audio(&vec![fill; FRAME_BYTES]);
        }
        assert_eq!(port.queued_frames(), MAX_QUEUED_FRAMES);
        assert_eq!(port.dropped_frames(), 10);
        // Head of the queue is frame 10, not frame 0.
        assert_eq!(port.pop_frame().unwrap()[0], 10);
    }

    #[test]
    fn clear_drops_queue_and_residual() {
        let port = AudioBridgePort::new();
        port.push_audio(&vec![0u8; FRAME_BYTES * 3 + 100]);
        assert_eq!(port.clear(), 3);
        assert_eq!(port.queued_frames(), 0);

        // Residual was cleared too: a half frame now queues nothing.
        port.push_audio(&vec![0u8; FRAME_BYTES / 2]);
        assert_eq!(port.queued_frames(), 0);
        // And completing it produces exactly one frame.
        port.push_audio(&vec![0u8; FRAME_BYTES / 2]);
        assert_eq!(port.queued_frames(), 1);
    }

    #[test]
    fn pop_on_empty_returns_none() {
        assert!(AudioBridgePort::new().pop_frame().is_none());
    }
}
