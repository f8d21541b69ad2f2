//! Gateway configuration from the environment.

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Everything the gateway needs to start. Missing secrets are fatal at
/// startup; no call is accepted with a half-configured gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Provider API key for the realtime endpoint.
    pub api_key: String,
    /// Trunk credentials and location.
    pub sip_user: String,
    pub sip_password: String,
    pub sip_server: String,
    pub sip_port: u16,
    /// Public address for NAT rewriting, if the box sits behind one.
    pub public_ip: Option<IpAddr>,
    /// SQLite database file.
    pub database_path: String,
    /// The numeric access code for the security gate. Never logged,
    /// never sent to the model.
    pub access_code: String,
    /// Dashboard bind address.
    pub api_host: String,
    pub api_port: u16,
    /// Whether the trunk firewall starts enabled.
    pub firewall_enabled: bool,
    /// Realtime endpoint prefix; the model id is appended.
    pub realtime_base_url: String,
    /// Silence budget while the security gate is active.
    pub inactivity_timeout: Duration,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl GatewayConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let api_key = env_opt("OPENAI_API_KEY").context("OPENAI_API_KEY is not set")?;
        let sip_user = env_opt("SIP_USER").context("SIP_USER is not set")?;
        let sip_password = env_opt("SIP_PASSWORD").context("SIP_PASSWORD is not set")?;
        let access_code = env_opt("ACCESS_CODE").context("ACCESS_CODE is not set")?;

        if access_code.chars().any(|c| !c.is_ascii_digit()) {
            bail!("ACCESS_CODE must be numeric");
        }

        let public_ip = match env_opt("SIP_PUBLIC_IP") {
            Some(raw) => Some(raw.parse().context("SIP_PUBLIC_IP is not an IP address")?),
            None => None,
        };

        Ok(GatewayConfig {
            api_key,
            sip_user,
            sip_password,
            sip_server: env_opt("SIP_SERVER").unwrap_or_else(|| "sipconnect.sipgate.de".into()),
            sip_port: env_opt("SIP_PORT")
                .map(|v| v.parse())
                .transpose()
                .context("SIP_PORT is not a port number")?
                .unwrap_or(5060),
            public_ip,
            database_path: env_opt("DATABASE_PATH").unwrap_or_else(|| "data/voxgate.db".into()),
            access_code,
            api_host: env_opt("API_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            api_port: env_opt("API_PORT")
                .map(|v| v.parse())
                .transpose()
                .context("API_PORT is not a port number")?
                .unwrap_or(8085),
            firewall_enabled: env_opt("FIREWALL_ENABLED")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(true),
            realtime_base_url: env_opt("REALTIME_BASE_URL")
                .unwrap_or_else(|| "wss://api.openai.com/v1/realtime?model=".into()),
            inactivity_timeout: Duration::from_secs(15),
        })
    }

    /// Our address-of-record, used by the firewall's local-test rule.
    pub fn identity_uri(&self) -> String {
        format!("sip:{}@{}", self.sip_user, self.sip_server)
    }
}
