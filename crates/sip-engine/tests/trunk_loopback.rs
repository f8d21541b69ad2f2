//! End-to-end engine test against a fake trunk on loopback UDP.
//!
//! The fake trunk answers REGISTER, places a PCMA call, streams RTP in
//! both directions and hangs up with BYE. Everything runs on ephemeral
//! ports so tests can run in parallel.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use voxgate_media_core::{alaw_encode, CodecKind, RtpPacket};
use voxgate_sip_core::{SdpSession, SipMessage, SipMethod, SipRequest, SipResponse};
use voxgate_sip_engine::{SipEngine, SipEngineConfig, SipEngineEvent};

const WAIT: Duration = Duration::from_secs(5);

struct FakeTrunk {
    socket: UdpSocket,
    engine_addr: Option<SocketAddr>,
    buf: Vec<u8>,
}

impl FakeTrunk {
    async fn bind() -> Self {
        FakeTrunk {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            engine_addr: None,
            buf: vec![0u8; 65535],
        }
    }

    fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    async fn recv(&mut self) -> SipMessage {
        let (len, from) = timeout(WAIT, self.socket.recv_from(&mut self.buf))
            .await
            .expect("trunk recv timed out")
            .unwrap();
        self.engine_addr = Some(from);
        SipMessage::parse(&self.buf[..len]).unwrap()
    }

    async fn send_to_engine(&self, bytes: &[u8]) {
        self.socket
            .send_to(bytes, self.engine_addr.unwrap())
            .await
            .unwrap();
    }

    /// Absorb REGISTER and confirm it so the engine reports registered.
    async fn answer_register(&mut self) {
        loop {
            if let SipMessage::Request(req) = self.recv().await {
                if req.method == SipMethod::Register {
                    let ok = SipResponse::for_request(&req, 200, "OK");
                    self.send_to_engine(&ok.to_bytes()).await;
                    return;
                }
            }
        }
    }

    fn invite(&self, call_id: &str) -> SipRequest {
        let rtp_port = 39000; // not actually bound; fine for TX-only checks
        let body = format!(
            "v=0\r\n\
             o=- 1 1 IN IP4 127.0.0.1\r\n\
             s=test\r\n\
             c=IN IP4 127.0.0.1\r\n\
             t=0 0\r\n\
             m=audio {} RTP/AVP 8\r\n\
             a=rtpmap:8 PCMA/8000\r\n",
            rtp_port
        );
        let mut req = SipRequest::new(SipMethod::Invite, "sip:gw@127.0.0.1");
        req.headers.push(
            "Via",
            format!("SIP/2.0/UDP 127.0.0.1:{};branch=z9hG4bKtest1", self.port()),
        );
        req.headers
            .push("From", "<sip:+4915551234@trunk.test>;tag=remote1");
        req.headers.push("To", "<sip:gw@127.0.0.1>");
        req.headers.push("Call-ID", call_id);
        req.headers.push("CSeq", "1 INVITE");
        req.headers
            .push("Contact", format!("<sip:caller@127.0.0.1:{}>", self.port()));
        req.with_body("application/sdp", body.into_bytes())
    }

    /// Wait for a final (>=200) response, skipping provisionals.
    async fn final_response(&mut self) -> SipResponse {
        loop {
            if let SipMessage::Response(resp) = self.recv().await {
                if resp.status >= 200 {
                    return resp;
                }
            }
        }
    }
}

async fn start_engine(trunk_port: u16) -> (
    voxgate_sip_engine::SipEngineHandle,
    tokio::sync::mpsc::Receiver<SipEngineEvent>,
) {
    let config = SipEngineConfig::new("127.0.0.1", "gw", "secret")
        .with_local_port(0)
        .with_rtp_ports(26000, 26998);
    let config = SipEngineConfig {
        server_port: trunk_port,
        ..config
    };
    SipEngine::start(config).await.unwrap()
}

async fn next_event(
    events: &mut tokio::sync::mpsc::Receiver<SipEngineEvent>,
) -> SipEngineEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("engine event timed out")
        .expect("engine event channel closed")
}

#[tokio::test]
async fn register_invite_media_and_bye() {
    let mut trunk = FakeTrunk::bind().await;
    let (handle, mut events) = start_engine(trunk.port()).await;

    trunk.answer_register().await;
    match next_event(&mut events).await {
        SipEngineEvent::RegistrationChanged { registered } => assert!(registered),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(handle.is_registered());

    // Ring the engine.
    let invite = trunk.invite("call-test-1@trunk");
    trunk.send_to_engine(&invite.to_bytes()).await;

    let call = match next_event(&mut events).await {
        SipEngineEvent::IncomingCall {
            call,
            caller_uri,
            remote_ip,
        } => {
            assert_eq!(caller_uri, "sip:+4915551234@trunk.test");
            assert_eq!(remote_ip, "127.0.0.1".parse::<std::net::IpAddr>().unwrap());
            call
        }
        other => panic!("unexpected event {:?}", other),
    };

    handle.accept(&call).await.unwrap();

    // Trunk sees the 200 with a PCMA answer in our RTP range.
    let ok = trunk.final_response().await;
    assert_eq!(ok.status, 200);
    let answer = SdpSession::parse(&String::from_utf8_lossy(&ok.body)).unwrap();
    let (rtp_ip, rtp_port) = answer.audio_endpoint().unwrap();
    assert!((26000..=26998).contains(&rtp_port));
    assert_eq!(answer.audio().unwrap().payload_type_for("PCMA"), Some(8));

    match next_event(&mut events).await {
        SipEngineEvent::CallActive { codec, .. } => assert_eq!(codec, CodecKind::Pcma),
        other => panic!("unexpected event {:?}", other),
    }

    // Stream one second of caller audio from the trunk side.
    let rtp_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let remote = SocketAddr::new(rtp_ip, rtp_port);
    let tone: Vec<u8> = (0..160).map(|n| alaw_encode((n * 100) as i16)).collect();
    for seq in 0..10u16 {
        let packet = RtpPacket {
            payload_type: 8,
            marker: seq == 0,
            sequence: seq,
            timestamp: seq as u32 * 160,
            ssrc: 0x1234,
            payload: tone.clone(),
        };
        rtp_socket.send_to(&packet.to_bytes(), remote).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Caller audio arrives as 48 kHz frames (160 samples @8k -> 1920 bytes).
    let pcm48 = loop {
        match next_event(&mut events).await {
            SipEngineEvent::AudioReceived { pcm48, .. } => break pcm48,
            SipEngineEvent::RegistrationChanged { .. } => continue,
            other => panic!("unexpected event {:?}", other),
        }
    };
    assert_eq!(pcm48.len(), 1920);

    // Outgoing audio reaches the trunk's RTP address... the engine
    // latched onto the offer's port, which nobody bound; the send pump
    // must keep running regardless (silence substitution contract).
    handle.send_audio(&call, &vec![0u8; 1920 * 3]);
    assert!(handle.clear_audio_queue(&call) <= 3);

    // Remote hangup.
    let mut bye = SipRequest::new(SipMethod::Bye, "sip:gw@127.0.0.1");
    bye.headers.push(
        "Via",
        format!("SIP/2.0/UDP 127.0.0.1:{};branch=z9hG4bKbye1", trunk.port()),
    );
    bye.headers
        .push("From", "<sip:+4915551234@trunk.test>;tag=remote1");
    bye.headers.push("To", "<sip:gw@127.0.0.1>");
    bye.headers.push("Call-ID", "call-test-1@trunk");
    bye.headers.push("CSeq", "2 BYE");
    bye.headers.push("Content-Length", "0");
    trunk.send_to_engine(&bye.to_bytes()).await;

    loop {
        match next_event(&mut events).await {
            SipEngineEvent::CallEnded { reason, .. } => {
                assert_eq!(reason, "remote_bye");
                break;
            }
            SipEngineEvent::AudioReceived { .. } => continue,
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(handle.current_call().is_none());
}

#[tokio::test]
async fn blacklisted_call_is_rejected_with_403() {
    let mut trunk = FakeTrunk::bind().await;
    let (handle, mut events) = start_engine(trunk.port()).await;

    trunk.answer_register().await;
    let _ = next_event(&mut events).await; // RegistrationChanged

    trunk
        .send_to_engine(&trunk.invite("call-reject-1@trunk").to_bytes())
        .await;
    let call = match next_event(&mut events).await {
        SipEngineEvent::IncomingCall { call, .. } => call,
        other => panic!("unexpected event {:?}", other),
    };

    handle.reject(&call, 403).await.unwrap();

    let resp = trunk.final_response().await;
    assert_eq!(resp.status, 403);
    assert_eq!(resp.reason, "Forbidden");

    match next_event(&mut events).await {
        SipEngineEvent::CallEnded { reason, .. } => assert_eq!(reason, "rejected"),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn video_only_offer_gets_488() {
    let mut trunk = FakeTrunk::bind().await;
    let (handle, mut events) = start_engine(trunk.port()).await;

    trunk.answer_register().await;
    let _ = next_event(&mut events).await;

    let mut invite = trunk.invite("call-video-1@trunk");
    let body = "v=0\r\nc=IN IP4 127.0.0.1\r\nm=video 4000 RTP/AVP 97\r\n";
    invite = invite.with_body("application/sdp", body.as_bytes().to_vec());
    trunk.send_to_engine(&invite.to_bytes()).await;

    let call = match next_event(&mut events).await {
        SipEngineEvent::IncomingCall { call, .. } => call,
        other => panic!("unexpected event {:?}", other),
    };

    assert!(handle.accept(&call).await.is_err());
    let resp = trunk.final_response().await;
    assert_eq!(resp.status, 488);
}
