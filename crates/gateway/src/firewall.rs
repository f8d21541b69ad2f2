//! Trunk IP firewall.
//!
//! Pre-accept filter over the INVITE's source address. The allow-list
//! is the provider's signalling network, compiled in; RFC 1918 sources
//! are admitted only when the caller URI looks like our own trunk
//! identity (local testing). The blacklist check runs *before* this
//! filter and is enforced even while the firewall is disabled.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

/// Provider signalling networks (sipgate), IPv4 and IPv6.
const TRUNK_NETWORKS: &[&str] = &[
    "217.10.64.0/20",
    "212.9.32.0/19",
    "2001:ab7::/32",
];

/// One parsed CIDR block.
#[derive(Debug, Clone, Copy)]
struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    fn parse(s: &str) -> Option<Cidr> {
        let (addr, prefix) = s.split_once('/')?;
        Some(Cidr {
            network: addr.parse().ok()?,
            prefix: prefix.parse().ok()?,
        })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let bits = 32u32.saturating_sub(self.prefix as u32);
                if bits >= 32 {
                    return true;
                }
                (u32::from(net) >> bits) == (u32::from(ip) >> bits)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let bits = 128u32.saturating_sub(self.prefix as u32);
                if bits >= 128 {
                    return true;
                }
                (u128::from(net) >> bits) == (u128::from(ip) >> bits)
            }
            _ => false,
        }
    }
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4 == Ipv4Addr::UNSPECIFIED
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6 == Ipv6Addr::UNSPECIFIED,
    }
}

/// Runtime-switchable trunk firewall.
pub struct TrunkFirewall {
    enabled: AtomicBool,
    allowed: Vec<Cidr>,
    /// Our own identity URI and the trunk hostname, for the
    /// local-testing exemption.
    own_identity: String,
    provider_host: String,
}

impl TrunkFirewall {
    pub fn new(enabled: bool, own_identity: String, provider_host: String) -> Self {
        let allowed = TRUNK_NETWORKS
            .iter()
            .filter_map(|s| Cidr::parse(s))
            .collect();
        TrunkFirewall {
            enabled: AtomicBool::new(enabled),
            allowed,
            own_identity,
            provider_host,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Enable/disable at runtime (dashboard control).
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            info!("trunk firewall enabled");
        } else {
            warn!("trunk firewall DISABLED");
        }
    }

    /// Pre-accept decision for one INVITE.
    pub fn allows(&self, source: IpAddr, caller_uri: &str) -> bool {
        if !self.is_enabled() {
            return true;
        }

        if self.allowed.iter().any(|cidr| cidr.contains(source)) {
            return true;
        }

        // Local testing: private sources are fine when the caller
        // claims our own trunk identity.
        if is_private(source)
            && (caller_uri.contains(&self.own_identity)
                || caller_uri.contains(&self.provider_host))
        {
            return true;
        }

        warn!("firewall rejecting INVITE from {} ({})", source, caller_uri);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firewall() -> TrunkFirewall {
        TrunkFirewall::new(
            true,
            "sip:gw1@sipconnect.sipgate.de".into(),
            "sipconnect.sipgate.de".into(),
        )
    }

    #[test]
    fn provider_network_is_allowed() {
        let fw = firewall();
        assert!(fw.allows("217.10.79.9".parse().unwrap(), "sip:+4912345@sipgate.de"));
        assert!(fw.allows("212.9.40.1".parse().unwrap(), "sip:+4912345@sipgate.de"));
        assert!(fw.allows(
            "2001:ab7:30::1".parse().unwrap(),
            "sip:+4912345@sipgate.de"
        ));
    }

    #[test]
    fn unknown_public_sources_are_rejected() {
        let fw = firewall();
        assert!(!fw.allows("8.8.8.8".parse().unwrap(), "sip:attacker@example.org"));
        assert!(!fw.allows("217.10.80.1".parse().unwrap(), "sip:x@y")); // just past /20
    }

    #[test]
    fn private_sources_need_our_identity() {
        let fw = firewall();
        assert!(fw.allows(
            "192.168.1.50".parse().unwrap(),
            "sip:test@sipconnect.sipgate.de"
        ));
        assert!(!fw.allows("192.168.1.50".parse().unwrap(), "sip:test@evil.example"));
    }

    #[test]
    fn disabled_firewall_allows_everything() {
        let fw = firewall();
        fw.set_enabled(false);
        assert!(fw.allows("8.8.8.8".parse().unwrap(), "sip:anyone@anywhere"));
        assert!(!fw.is_enabled());
    }

    #[test]
    fn cidr_boundaries_are_exact() {
        let cidr = Cidr::parse("217.10.64.0/20").unwrap();
        assert!(cidr.contains("217.10.64.0".parse().unwrap()));
        assert!(cidr.contains("217.10.79.255".parse().unwrap()));
        assert!(!cidr.contains("217.10.63.255".parse().unwrap()));
        assert!(!cidr.contains("217.10.80.0".parse().unwrap()));
    }
}
