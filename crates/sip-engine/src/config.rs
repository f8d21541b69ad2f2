//! Engine configuration.

use std::net::IpAddr;
use std::time::Duration;

/// Configuration for the trunk engine.
///
/// The public address is published in Contact/Via headers and SDP
/// c-lines when set; without it a trunk behind NAT will route media to
/// an unreachable private address.
#[derive(Debug, Clone)]
pub struct SipEngineConfig {
    /// Trunk registrar/proxy host.
    pub server: String,
    /// Trunk SIP port.
    pub server_port: u16,
    /// Auth/identity user.
    pub username: String,
    /// Digest password.
    pub password: String,
    /// Local SIP listening port.
    pub local_port: u16,
    /// Public address for NAT rewriting (Contact, Via, SDP).
    pub public_ip: Option<IpAddr>,
    /// First RTP port (inclusive).
    pub rtp_port_start: u16,
    /// Last RTP port (inclusive). Must match the firewall.
    pub rtp_port_end: u16,
    /// Registration refresh interval.
    pub register_interval: Duration,
    /// How long an unanswered INVITE rings before the engine sends 408.
    pub invite_timeout: Duration,
    /// RTP silence period after which the call is torn down.
    pub media_timeout: Duration,
}

impl SipEngineConfig {
    /// Build a config for `user@server` with the stock trunk defaults.
    pub fn new(
        server: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        SipEngineConfig {
            server: server.into(),
            server_port: 5060,
            username: username.into(),
            password: password.into(),
            local_port: 5060,
            public_ip: None,
            rtp_port_start: 4000,
            rtp_port_end: 4100,
            register_interval: Duration::from_secs(300),
            invite_timeout: Duration::from_secs(30),
            media_timeout: Duration::from_secs(10),
        }
    }

    /// Set the published public address.
    pub fn with_public_ip(mut self, ip: IpAddr) -> Self {
        self.public_ip = Some(ip);
        self
    }

    /// Set the local SIP port.
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    /// Set the RTP port range (inclusive).
    pub fn with_rtp_ports(mut self, start: u16, end: u16) -> Self {
        self.rtp_port_start = start;
        self.rtp_port_end = end;
        self
    }

    /// Our address-of-record URI.
    pub fn identity_uri(&self) -> String {
        format!("sip:{}@{}", self.username, self.server)
    }

    /// The registrar URI.
    pub fn registrar_uri(&self) -> String {
        format!("sip:{}:{}", self.server, self.server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_trunk_contract() {
        let cfg = SipEngineConfig::new("trunk.example.net", "gw1", "secret");
        assert_eq!(cfg.rtp_port_start, 4000);
        assert_eq!(cfg.rtp_port_end, 4100);
        assert_eq!(cfg.register_interval, Duration::from_secs(300));
        assert_eq!(cfg.identity_uri(), "sip:gw1@trunk.example.net");
        assert_eq!(cfg.registrar_uri(), "sip:trunk.example.net:5060");
    }
}
