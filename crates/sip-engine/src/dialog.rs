//! Dialog bookkeeping and SIP message builders for the incoming leg.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use voxgate_media_core::CodecKind;
use voxgate_sip_core::{
    build_audio_sdp, new_branch, Headers, SdpSession, SipMethod, SipRequest, SipResponse,
};

use crate::bridge::AudioBridgePort;
use crate::error::{Result, SipEngineError};
use crate::events::CallHandle;

/// Where an incoming dialog currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogPhase {
    /// INVITE received, waiting for an accept/reject decision.
    Ringing,
    /// 200 sent, media running.
    Active,
    /// Final response sent or BYE exchanged; kept briefly for
    /// retransmission absorption.
    Ended,
}

/// State for one incoming call dialog.
pub struct Dialog {
    pub handle: CallHandle,
    pub caller_uri: String,
    pub remote_ip: IpAddr,
    /// Signalling address the INVITE came from; responses and our BYE
    /// go back there.
    pub signalling_addr: SocketAddr,
    /// The original INVITE, for building responses.
    pub invite: SipRequest,
    /// Our To-tag, minted when the dialog is created.
    pub local_tag: String,
    pub phase: Mutex<DialogPhase>,
    /// Our CSeq counter for in-dialog requests (BYE).
    pub local_cseq: AtomicU32,
    /// Guards the single CallEnded emission.
    pub ended_emitted: AtomicBool,
    /// Outgoing audio port; present for the whole dialog so early
    /// `send_audio` calls are harmless.
    pub bridge: Arc<AudioBridgePort>,
    /// Media task handles, populated on accept.
    pub media_tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Ring-timeout task handle, populated while ringing.
    pub ring_timeout: Mutex<Option<JoinHandle<()>>>,
    /// Last final response, replayed on INVITE retransmissions.
    pub last_final: Mutex<Option<SipResponse>>,
}

impl Dialog {
    pub fn new(
        handle: CallHandle,
        caller_uri: String,
        remote_ip: IpAddr,
        signalling_addr: SocketAddr,
        invite: SipRequest,
    ) -> Self {
        Dialog {
            handle,
            caller_uri,
            remote_ip,
            signalling_addr,
            invite,
            local_tag: voxgate_sip_core::new_tag(),
            phase: Mutex::new(DialogPhase::Ringing),
            local_cseq: AtomicU32::new(1),
            ended_emitted: AtomicBool::new(false),
            bridge: Arc::new(AudioBridgePort::new()),
            media_tasks: Mutex::new(Vec::new()),
            ring_timeout: Mutex::new(None),
            last_final: Mutex::new(None),
        }
    }

    /// Transition Ringing → Active. Errors if the caller hung up or a
    /// decision was already made.
    pub fn begin_accept(&self) -> Result<()> {
        let mut phase = self.phase.lock();
        match *phase {
            DialogPhase::Ringing => {
                *phase = DialogPhase::Active;
                Ok(())
            }
            other => Err(SipEngineError::InvalidState {
                call: self.handle.to_string(),
                details: format!("cannot accept in phase {:?}", other),
            }),
        }
    }

    /// Transition to Ended; returns false if already there.
    pub fn end(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase == DialogPhase::Ended {
            return false;
        }
        *phase = DialogPhase::Ended;
        true
    }

    pub fn phase(&self) -> DialogPhase {
        *self.phase.lock()
    }

    /// Whether this dialog ever reached Active.
    pub fn was_accepted(&self) -> bool {
        matches!(self.phase(), DialogPhase::Active)
    }

    /// Abort all media tasks and the ring timer.
    pub fn stop_tasks(&self) {
        for task in self.media_tasks.lock().drain(..) {
            task.abort();
        }
        if let Some(task) = self.ring_timeout.lock().take() {
            task.abort();
        }
    }

    /// Build a response to the stored INVITE with our To-tag appended.
    pub fn response(&self, status: u16, reason: &str) -> SipResponse {
        let mut resp = SipResponse::for_request(&self.invite, status, reason);
        if let Some(to) = resp.headers.get("To") {
            if Headers::tag(to).is_none() {
                let tagged = format!("{};tag={}", to, self.local_tag);
                resp.headers.set("To", tagged);
            }
        }
        resp
    }

    /// Build the 200 OK answer carrying our SDP.
    pub fn ok_with_sdp(
        &self,
        contact_host: IpAddr,
        sip_port: u16,
        rtp_port: u16,
        codec: CodecKind,
        payload_type: u8,
    ) -> SipResponse {
        let sdp = build_audio_sdp(
            contact_host,
            rtp_port,
            &[(payload_type, codec.rtpmap())],
        );
        let mut resp = self.response(200, "OK");
        resp.headers.push(
            "Contact",
            format!("<sip:{}:{}>", contact_host, sip_port),
        );
        resp.with_body("application/sdp", sdp.into_bytes())
    }

    /// Build an in-dialog BYE towards the caller.
    pub fn bye(&self, via_host: IpAddr, sip_port: u16) -> SipRequest {
        // Request-URI: the caller's Contact when present, their From
        // URI otherwise.
        let target = self
            .invite
            .headers
            .get("Contact")
            .map(Headers::address)
            .unwrap_or(&self.caller_uri)
            .to_string();

        let cseq = self.local_cseq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut req = SipRequest::new(SipMethod::Bye, target);
        req.headers.push(
            "Via",
            format!(
                "SIP/2.0/UDP {}:{};branch={}",
                via_host,
                sip_port,
                new_branch()
            ),
        );
        // From/To are swapped relative to the INVITE: we are the callee.
        if let Some(to) = self.invite.headers.get("To") {
            req.headers
                .push("From", format!("{};tag={}", to, self.local_tag));
        }
        if let Some(from) = self.invite.headers.get("From") {
            req.headers.push("To", from);
        }
        if let Some(call_id) = self.invite.headers.get("Call-ID") {
            req.headers.push("Call-ID", call_id);
        }
        req.headers.push("CSeq", format!("{} BYE", cseq));
        req.headers.push("Content-Length", "0");
        req
    }
}

/// Pick the best codec we share with the offer, in fixed priority
/// order: Opus > G.722 > PCMA > PCMU. Returns the codec and the payload
/// type the *offer* bound it to.
pub fn negotiate_codec(offer: &SdpSession) -> Result<(CodecKind, u8)> {
    let audio = offer.audio().ok_or(SipEngineError::NoCommonCodec)?;
    for kind in CodecKind::PRIORITY {
        if let Some(pt) = audio.payload_type_for(kind.encoding_name()) {
            return Ok((kind, pt));
        }
    }
    Err(SipEngineError::NoCommonCodec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxgate_sip_core::SipMessage;

    fn sample_invite() -> SipRequest {
        let raw = "INVITE sip:gw@10.0.0.1 SIP/2.0\r\n\
            Via: SIP/2.0/UDP 217.10.79.9:5060;branch=z9hG4bKabc\r\n\
            From: <sip:+4912345@trunk.example.net>;tag=remote1\r\n\
            To: <sip:gw@10.0.0.1>\r\n\
            Call-ID: call-1@217.10.79.9\r\n\
            CSeq: 1 INVITE\r\n\
            Contact: <sip:+4912345@217.10.79.9:5060>\r\n\
            Content-Length: 0\r\n\r\n";
        match SipMessage::parse(raw.as_bytes()).unwrap() {
            SipMessage::Request(r) => r,
            _ => panic!("expected request"),
        }
    }

    fn sample_dialog() -> Dialog {
        Dialog::new(
            CallHandle::new("call-1@217.10.79.9"),
            "sip:+4912345@trunk.example.net".into(),
            "217.10.79.9".parse().unwrap(),
            "217.10.79.9:5060".parse().unwrap(),
            sample_invite(),
        )
    }

    #[test]
    fn responses_carry_our_to_tag() {
        let dialog = sample_dialog();
        let resp = dialog.response(180, "Ringing");
        let to = resp.headers.get("To").unwrap();
        assert_eq!(Headers::tag(to), Some(dialog.local_tag.as_str()));
    }

    #[test]
    fn bye_swaps_from_and_to() {
        let dialog = sample_dialog();
        let bye = dialog.bye("10.0.0.1".parse().unwrap(), 5060);
        assert_eq!(bye.uri, "sip:+4912345@217.10.79.9:5060");
        let from = bye.headers.get("From").unwrap();
        assert!(from.contains("sip:gw@10.0.0.1"));
        assert_eq!(Headers::tag(from), Some(dialog.local_tag.as_str()));
        let to = bye.headers.get("To").unwrap();
        assert_eq!(Headers::tag(to), Some("remote1"));
    }

    #[test]
    fn accept_is_single_shot() {
        let dialog = sample_dialog();
        assert!(dialog.begin_accept().is_ok());
        assert!(dialog.begin_accept().is_err());
    }

    #[test]
    fn negotiation_follows_priority() {
        let offer = SdpSession::parse(
            "v=0\r\nc=IN IP4 1.2.3.4\r\nm=audio 4000 RTP/AVP 0 8 9\r\n",
        )
        .unwrap();
        // No opus on offer: G.722 wins over both G.711 variants.
        assert_eq!(
            negotiate_codec(&offer).unwrap(),
            (CodecKind::G722, 9)
        );

        let opus_offer = SdpSession::parse(
            "v=0\r\nc=IN IP4 1.2.3.4\r\nm=audio 4000 RTP/AVP 0 111\r\na=rtpmap:111 opus/48000/2\r\n",
        )
        .unwrap();
        assert_eq!(
            negotiate_codec(&opus_offer).unwrap(),
            (CodecKind::Opus, 111)
        );
    }

    #[test]
    fn negotiation_fails_on_video_only_offer() {
        let offer =
            SdpSession::parse("v=0\r\nc=IN IP4 1.2.3.4\r\nm=video 4000 RTP/AVP 97\r\n").unwrap();
        assert!(matches!(
            negotiate_codec(&offer),
            Err(SipEngineError::NoCommonCodec)
        ));
    }
}
