//! The voxgate gateway library.
//!
//! Wires the SIP engine, the realtime AI session, the agent layer and
//! the access-control stores into one orchestrator, and exposes the
//! dashboard WebSocket for observers.

pub mod call;
pub mod config;
pub mod dashboard;
pub mod firewall;
pub mod orchestrator;
pub mod pricing;
pub mod store;

pub use config::GatewayConfig;
pub use firewall::TrunkFirewall;
pub use orchestrator::Orchestrator;
