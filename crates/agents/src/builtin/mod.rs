//! Built-in agents: the silent security gate and the hub ("Zentrale").

mod main_agent;
mod security;

pub use main_agent::MainAgent;
pub use security::SecurityAgent;
