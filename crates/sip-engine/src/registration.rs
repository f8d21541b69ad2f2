//! Trunk registration task.
//!
//! Sends REGISTER every `register_interval`, answers digest challenges,
//! and retries with backoff on network failure. Failures are silent
//! towards the caller side: the engine just keeps trying and reports
//! state flips on the event channel.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use voxgate_sip_core::{
    digest_authorization, new_branch, new_call_id, new_tag, DigestChallenge, SipMethod,
    SipRequest, SipResponse,
};

use crate::config::SipEngineConfig;
use crate::events::SipEngineEvent;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const BACKOFF_START: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

pub struct RegistrationTask {
    pub config: SipEngineConfig,
    pub socket: Arc<UdpSocket>,
    pub server_addr: SocketAddr,
    /// Address we advertise in Via/Contact.
    pub advertised_ip: IpAddr,
    /// REGISTER responses routed here by the transport loop.
    pub responses: mpsc::Receiver<SipResponse>,
    pub registered: Arc<AtomicBool>,
    pub events: mpsc::Sender<SipEngineEvent>,
}

impl RegistrationTask {
    pub async fn run(mut self) {
        let call_id = new_call_id(&self.config.server);
        let from_tag = new_tag();
        let mut cseq: u32 = 0;
        let mut backoff = BACKOFF_START;

        loop {
            cseq += 1;
            let ok = self
                .register_once(&call_id, &from_tag, &mut cseq)
                .await;

            self.set_registered(ok).await;

            if ok {
                backoff = BACKOFF_START;
                tokio::time::sleep(self.config.register_interval).await;
            } else {
                debug!("registration retry in {:?}", backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }

    /// One REGISTER exchange, answering at most one digest challenge.
    async fn register_once(&mut self, call_id: &str, from_tag: &str, cseq: &mut u32) -> bool {
        let request = self.build_register(call_id, from_tag, *cseq, None);
        let Some(response) = self.exchange(request).await else {
            return false;
        };

        match response.status {
            200 => {
                debug!("registration refreshed");
                true
            }
            401 | 407 => {
                let header = response
                    .headers
                    .get("WWW-Authenticate")
                    .or_else(|| response.headers.get("Proxy-Authenticate"));
                let Some(header) = header else {
                    warn!("challenge without authenticate header");
                    return false;
                };
                let challenge = match DigestChallenge::parse(header) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("unusable digest challenge: {}", e);
                        return false;
                    }
                };

                *cseq += 1;
                let request = self.build_register(call_id, from_tag, *cseq, Some(&challenge));
                match self.exchange(request).await {
                    Some(resp) if resp.status == 200 => {
                        info!("registered at {} as {}", self.config.server, self.config.username);
                        true
                    }
                    Some(resp) => {
                        warn!("registration rejected: {} {}", resp.status, resp.reason);
                        false
                    }
                    None => false,
                }
            }
            status => {
                warn!("registration failed: {} {}", status, response.reason);
                false
            }
        }
    }

    fn build_register(
        &self,
        call_id: &str,
        from_tag: &str,
        cseq: u32,
        challenge: Option<&DigestChallenge>,
    ) -> SipRequest {
        let registrar = self.config.registrar_uri();
        let identity = self.config.identity_uri();

        let mut req = SipRequest::new(SipMethod::Register, registrar.clone());
        req.headers.push(
            "Via",
            format!(
                "SIP/2.0/UDP {}:{};branch={};rport",
                self.advertised_ip,
                self.config.local_port,
                new_branch()
            ),
        );
        req.headers.push("Max-Forwards", "70");
        req.headers
            .push("From", format!("<{}>;tag={}", identity, from_tag));
        req.headers.push("To", format!("<{}>", identity));
        req.headers.push("Call-ID", call_id);
        req.headers.push("CSeq", format!("{} REGISTER", cseq));
        req.headers.push(
            "Contact",
            format!(
                "<sip:{}@{}:{}>",
                self.config.username, self.advertised_ip, self.config.local_port
            ),
        );
        req.headers.push(
            "Expires",
            self.config.register_interval.as_secs().to_string(),
        );
        req.headers.push("User-Agent", "voxgate");
        req.headers.push("Content-Length", "0");

        if let Some(challenge) = challenge {
            let authorization = digest_authorization(
                challenge,
                &self.config.username,
                &self.config.password,
                "REGISTER",
                &registrar,
            );
            req.headers.push("Authorization", authorization);
        }
        req
    }

    /// Send a request and wait for the matching response.
    async fn exchange(&mut self, request: SipRequest) -> Option<SipResponse> {
        let wanted_cseq = request.cseq();
        if let Err(e) = self
            .socket
            .send_to(&request.to_bytes(), self.server_addr)
            .await
        {
            warn!("REGISTER send failed: {}", e);
            return None;
        }

        let deadline = tokio::time::Instant::now() + RESPONSE_TIMEOUT;
        loop {
            let response =
                tokio::time::timeout_at(deadline, self.responses.recv()).await;
            match response {
                Ok(Some(resp)) => {
                    // Absorb stale retransmissions from earlier cycles.
                    if resp.cseq() != wanted_cseq {
                        continue;
                    }
                    // 1xx is provisional; keep waiting.
                    if resp.status < 200 {
                        continue;
                    }
                    return Some(resp);
                }
                Ok(None) => return None,
                Err(_) => {
                    debug!("REGISTER response timeout");
                    return None;
                }
            }
        }
    }

    async fn set_registered(&self, now: bool) {
        let was = self.registered.swap(now, Ordering::SeqCst);
        if was != now {
            if now {
                info!("SIP registration active");
            } else {
                warn!("SIP registration lost");
            }
            let _ = self
                .events
                .send(SipEngineEvent::RegistrationChanged { registered: now })
                .await;
        }
    }
}
