//! The trunk engine: transport loop, dialog handling and the public
//! call-control surface.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use voxgate_sip_core::{Headers, SdpSession, SipMessage, SipMethod, SipRequest, SipResponse};

use crate::config::SipEngineConfig;
use crate::dialog::{negotiate_codec, Dialog, DialogPhase};
use crate::error::{Result, SipEngineError};
use crate::events::{CallHandle, SipEngineEvent};
use crate::registration::RegistrationTask;
use crate::rtp::{bind_rtp_socket, spawn_media_tasks, RtpSessionParams};

/// Capacity of the engine event channel. Audio events are dropped
/// (and counted) when the consumer lags; signalling events await.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The engine entry point; construct with [`SipEngine::start`].
pub struct SipEngine;

impl SipEngine {
    /// Bind the SIP socket, spawn the transport and registration
    /// tasks, and hand back the control handle plus the event stream.
    pub async fn start(
        config: SipEngineConfig,
    ) -> Result<(SipEngineHandle, mpsc::Receiver<SipEngineEvent>)> {
        let server_addr = resolve_server(&config).await?;

        let socket = UdpSocket::bind(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            config.local_port,
        ))
        .await?;
        let socket = Arc::new(socket);

        let local_ip = detect_local_ip(server_addr).await;
        let advertised_ip = config.public_ip.unwrap_or(local_ip);
        if config.public_ip.is_none() {
            warn!("no public IP configured; NAT peers will not reach media");
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (reg_tx, reg_rx) = mpsc::channel(8);

        let inner = Arc::new(EngineInner {
            config: config.clone(),
            socket: Arc::clone(&socket),
            advertised_ip,
            registered: Arc::new(AtomicBool::new(false)),
            dialogs: DashMap::new(),
            events: events_tx.clone(),
        });

        // Registration keeps itself alive with backoff; failures stay
        // on the event channel, never panic the engine.
        let registration = RegistrationTask {
            config,
            socket: Arc::clone(&socket),
            server_addr,
            advertised_ip,
            responses: reg_rx,
            registered: Arc::clone(&inner.registered),
            events: events_tx,
        };
        tokio::spawn(registration.run());

        let transport_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            transport_loop(transport_inner, reg_tx).await;
        });

        info!(
            "SIP engine started on port {} (advertising {})",
            inner.config.local_port, advertised_ip
        );
        Ok((SipEngineHandle { inner }, events_rx))
    }
}

/// Cloneable control surface over the running engine.
#[derive(Clone)]
pub struct SipEngineHandle {
    inner: Arc<EngineInner>,
}

impl SipEngineHandle {
    /// Whether the trunk currently accepts our registration.
    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::SeqCst)
    }

    /// Answer a ringing call with 200 and start media.
    pub async fn accept(&self, call: &CallHandle) -> Result<()> {
        self.inner.accept(call).await
    }

    /// Reject a ringing call with the given status (403 for the
    /// firewall/blacklist path).
    pub async fn reject(&self, call: &CallHandle, status: u16) -> Result<()> {
        self.inner.reject(call, status).await
    }

    /// End an active call with BYE (or reject it if still ringing).
    pub async fn hangup(&self, call: &CallHandle) -> Result<()> {
        self.inner.hangup(call).await
    }

    /// Enqueue outgoing 48 kHz PCM16 audio for the caller.
    pub fn send_audio(&self, call: &CallHandle, pcm48: &[u8]) {
        if let Some(dialog) = self.inner.dialogs.get(call) {
            dialog.bridge.push_audio(pcm48);
        }
    }

    /// Barge-in: flush the outgoing queue. Returns frames dropped.
    pub fn clear_audio_queue(&self, call: &CallHandle) -> usize {
        match self.inner.dialogs.get(call) {
            Some(dialog) => dialog.bridge.clear(),
            None => 0,
        }
    }

    /// The call currently ringing or active, if any.
    pub fn current_call(&self) -> Option<CallHandle> {
        self.inner
            .dialogs
            .iter()
            .find(|entry| entry.value().phase() != DialogPhase::Ended)
            .map(|entry| entry.key().clone())
    }
}

struct EngineInner {
    config: SipEngineConfig,
    socket: Arc<UdpSocket>,
    advertised_ip: IpAddr,
    registered: Arc<AtomicBool>,
    dialogs: DashMap<CallHandle, Arc<Dialog>>,
    events: mpsc::Sender<SipEngineEvent>,
}

impl EngineInner {
    async fn send_response(&self, response: &SipResponse, to: SocketAddr) {
        if let Err(e) = self.socket.send_to(&response.to_bytes(), to).await {
            warn!("response send failed: {}", e);
        }
    }

    async fn accept(self: &Arc<Self>, call: &CallHandle) -> Result<()> {
        let dialog = self
            .dialogs
            .get(call)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| SipEngineError::UnknownCall(call.to_string()))?;

        dialog.begin_accept()?;
        if let Some(timer) = dialog.ring_timeout.lock().take() {
            timer.abort();
        }

        // Negotiate the audio stream out of the offer.
        let offer_text = String::from_utf8_lossy(&dialog.invite.body);
        let negotiated = SdpSession::parse(&offer_text)
            .ok()
            .and_then(|offer| {
                let endpoint = offer.audio_endpoint()?;
                let codec = negotiate_codec(&offer).ok()?;
                Some((endpoint, codec))
            });

        let ((remote_ip, remote_port), (codec, payload_type)) = match negotiated {
            Some(n) => n,
            None => {
                let resp = dialog.response(488, "Not Acceptable Here");
                self.send_response(&resp, dialog.signalling_addr).await;
                *dialog.last_final.lock() = Some(resp);
                self.teardown(&dialog, "negotiation_failed").await;
                return Err(SipEngineError::NoCommonCodec);
            }
        };

        let rtp_socket = bind_rtp_socket(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            self.config.rtp_port_start,
            self.config.rtp_port_end,
        )
        .await?;
        let rtp_port = rtp_socket.local_addr()?.port();

        let ok = dialog.ok_with_sdp(
            self.advertised_ip,
            self.config.local_port,
            rtp_port,
            codec,
            payload_type,
        );
        self.send_response(&ok, dialog.signalling_addr).await;
        *dialog.last_final.lock() = Some(ok);

        info!(
            "call {} accepted: {:?} pt={} remote={}:{}",
            call, codec, payload_type, remote_ip, remote_port
        );

        let (tasks, mut media_timeout) = spawn_media_tasks(RtpSessionParams {
            call: call.clone(),
            socket: rtp_socket,
            remote: SocketAddr::new(remote_ip, remote_port),
            codec,
            payload_type,
            bridge: Arc::clone(&dialog.bridge),
            events: self.events.clone(),
            media_timeout: self.config.media_timeout,
        })?;
        dialog.media_tasks.lock().extend(tasks);

        // Dropped RTP surfaces as a normal call end.
        let watcher_inner = Arc::clone(self);
        let watcher_dialog = Arc::clone(&dialog);
        let watcher = tokio::spawn(async move {
            if media_timeout.recv().await.is_some() {
                watcher_inner.teardown(&watcher_dialog, "media_timeout").await;
            }
        });
        dialog.media_tasks.lock().push(watcher);

        let _ = self
            .events
            .send(SipEngineEvent::CallActive {
                call: call.clone(),
                codec,
            })
            .await;
        Ok(())
    }

    async fn reject(self: &Arc<Self>, call: &CallHandle, status: u16) -> Result<()> {
        let dialog = self
            .dialogs
            .get(call)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| SipEngineError::UnknownCall(call.to_string()))?;

        if dialog.phase() != DialogPhase::Ringing {
            return Err(SipEngineError::InvalidState {
                call: call.to_string(),
                details: "reject only applies to ringing calls".into(),
            });
        }

        let resp = dialog.response(status, reason_phrase(status));
        self.send_response(&resp, dialog.signalling_addr).await;
        *dialog.last_final.lock() = Some(resp);
        info!("call {} rejected with {}", call, status);
        self.teardown(&dialog, "rejected").await;
        Ok(())
    }

    async fn hangup(self: &Arc<Self>, call: &CallHandle) -> Result<()> {
        let dialog = self
            .dialogs
            .get(call)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| SipEngineError::UnknownCall(call.to_string()))?;

        match dialog.phase() {
            DialogPhase::Active => {
                let bye = dialog.bye(self.advertised_ip, self.config.local_port);
                if let Err(e) = self
                    .socket
                    .send_to(&bye.to_bytes(), dialog.signalling_addr)
                    .await
                {
                    warn!("BYE send failed: {}", e);
                }
                self.teardown(&dialog, "local_hangup").await;
                Ok(())
            }
            DialogPhase::Ringing => self.reject(call, 486).await,
            DialogPhase::Ended => Ok(()),
        }
    }

    /// Single-exit cleanup: flips the phase, removes the dialog, emits
    /// exactly one CallEnded, and aborts the media tasks last so a
    /// media task may safely call this about itself.
    async fn teardown(self: &Arc<Self>, dialog: &Arc<Dialog>, reason: &str) {
        if !dialog.end() {
            return;
        }
        self.dialogs.remove(&dialog.handle);

        if !dialog.ended_emitted.swap(true, Ordering::SeqCst) {
            let _ = self
                .events
                .send(SipEngineEvent::CallEnded {
                    call: dialog.handle.clone(),
                    reason: reason.to_string(),
                })
                .await;
        }
        info!("call {} ended: {}", dialog.handle, reason);
        dialog.stop_tasks();
    }
}

async fn transport_loop(inner: Arc<EngineInner>, reg_tx: mpsc::Sender<SipResponse>) {
    let mut buf = vec![0u8; 65535];
    loop {
        let (len, from) = match inner.socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("SIP socket error: {}", e);
                continue;
            }
        };

        match SipMessage::parse(&buf[..len]) {
            Ok(SipMessage::Request(req)) => handle_request(&inner, req, from).await,
            Ok(SipMessage::Response(resp)) => {
                match resp.cseq() {
                    Some((_, SipMethod::Register)) => {
                        let _ = reg_tx.send(resp).await;
                    }
                    Some((_, SipMethod::Bye)) => {
                        debug!("BYE answered with {}", resp.status);
                    }
                    _ => debug!("ignoring response {} {}", resp.status, resp.reason),
                }
            }
            Err(e) => debug!("unparseable datagram from {}: {}", from, e),
        }
    }
}

async fn handle_request(inner: &Arc<EngineInner>, req: SipRequest, from: SocketAddr) {
    match req.method {
        SipMethod::Invite => handle_invite(inner, req, from).await,
        SipMethod::Ack => {
            debug!("ACK received");
        }
        SipMethod::Bye => {
            let resp = SipResponse::for_request(&req, 200, "OK");
            inner.send_response(&resp, from).await;
            if let Some(dialog) = lookup_dialog(inner, &req) {
                inner.teardown(&dialog, "remote_bye").await;
            }
        }
        SipMethod::Cancel => {
            let resp = SipResponse::for_request(&req, 200, "OK");
            inner.send_response(&resp, from).await;
            if let Some(dialog) = lookup_dialog(inner, &req) {
                if dialog.phase() == DialogPhase::Ringing {
                    let terminated = dialog.response(487, "Request Terminated");
                    inner.send_response(&terminated, dialog.signalling_addr).await;
                    inner.teardown(&dialog, "cancelled").await;
                }
            }
        }
        SipMethod::Options => {
            let mut resp = SipResponse::for_request(&req, 200, "OK");
            resp.headers
                .set("Allow", "INVITE, ACK, BYE, CANCEL, OPTIONS");
            inner.send_response(&resp, from).await;
        }
        SipMethod::Register | SipMethod::Other(_) => {
            let resp = SipResponse::for_request(&req, 405, "Method Not Allowed");
            inner.send_response(&resp, from).await;
        }
    }
}

async fn handle_invite(inner: &Arc<EngineInner>, req: SipRequest, from: SocketAddr) {
    let Some(call_id) = req.headers.get("Call-ID").map(str::to_string) else {
        let resp = SipResponse::for_request(&req, 400, "Bad Request");
        inner.send_response(&resp, from).await;
        return;
    };
    let handle = CallHandle::new(&call_id);

    // Retransmission: replay our latest answer for this dialog.
    if let Some(dialog) = inner.dialogs.get(&handle).map(|e| Arc::clone(e.value())) {
        let replay = dialog.last_final.lock().clone();
        match replay {
            Some(resp) => inner.send_response(&resp, from).await,
            None => {
                let ringing = dialog.response(180, "Ringing");
                inner.send_response(&ringing, from).await;
            }
        }
        return;
    }

    // One call at a time.
    let busy = inner
        .dialogs
        .iter()
        .any(|entry| entry.value().phase() != DialogPhase::Ended);
    if busy {
        let resp = SipResponse::for_request(&req, 486, "Busy Here");
        inner.send_response(&resp, from).await;
        return;
    }

    let caller_uri = req
        .headers
        .get("From")
        .map(Headers::address)
        .unwrap_or("sip:unknown")
        .to_string();

    info!("incoming call from {} ({})", caller_uri, from.ip());

    let dialog = Arc::new(Dialog::new(
        handle.clone(),
        caller_uri.clone(),
        from.ip(),
        from,
        req,
    ));

    let trying = SipResponse::for_request(&dialog.invite, 100, "Trying");
    inner.send_response(&trying, from).await;
    let ringing = dialog.response(180, "Ringing");
    inner.send_response(&ringing, from).await;

    inner.dialogs.insert(handle.clone(), Arc::clone(&dialog));

    // Nobody decided in time: 408 and clean up.
    let timeout_inner = Arc::clone(inner);
    let timeout_dialog = Arc::clone(&dialog);
    let invite_timeout = inner.config.invite_timeout;
    let timer = tokio::spawn(async move {
        tokio::time::sleep(invite_timeout).await;
        if timeout_dialog.phase() == DialogPhase::Ringing {
            let resp = timeout_dialog.response(408, "Request Timeout");
            timeout_inner
                .send_response(&resp, timeout_dialog.signalling_addr)
                .await;
            *timeout_dialog.last_final.lock() = Some(resp);
            timeout_inner.teardown(&timeout_dialog, "invite_timeout").await;
        }
    });
    *dialog.ring_timeout.lock() = Some(timer);

    let _ = inner
        .events
        .send(SipEngineEvent::IncomingCall {
            call: handle,
            caller_uri,
            remote_ip: from.ip(),
        })
        .await;
}

fn lookup_dialog(inner: &Arc<EngineInner>, req: &SipRequest) -> Option<Arc<Dialog>> {
    let call_id = req.headers.get("Call-ID")?;
    inner
        .dialogs
        .get(&CallHandle::new(call_id))
        .map(|e| Arc::clone(e.value()))
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        480 => "Temporarily Unavailable",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        603 => "Decline",
        _ => "Rejected",
    }
}

async fn resolve_server(config: &SipEngineConfig) -> Result<SocketAddr> {
    let mut addrs =
        tokio::net::lookup_host((config.server.as_str(), config.server_port)).await?;
    addrs.next().ok_or_else(|| {
        SipEngineError::Network(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address for {}", config.server),
        ))
    })
}

/// Discover the local interface used towards the trunk by opening a
/// throwaway connected socket. No traffic is sent.
async fn detect_local_ip(server: SocketAddr) -> IpAddr {
    let probe = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(s) => s,
        Err(_) => return IpAddr::V4(Ipv4Addr::LOCALHOST),
    };
    if probe.connect(server).await.is_err() {
        return IpAddr::V4(Ipv4Addr::LOCALHOST);
    }
    probe
        .local_addr()
        .map(|a| a.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
