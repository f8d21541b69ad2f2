//! Startup-time agent registry.
//!
//! Agents register explicitly at build time (no filesystem discovery);
//! the registry is effectively immutable once the gateway is serving
//! calls. Duplicate names overwrite with a warning.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::agent::Agent;

/// Map from agent name to agent, plus registration order.
pub struct AgentRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    agents: HashMap<String, Arc<dyn Agent>>,
    order: Vec<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        AgentRegistry {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register an agent. A duplicate name replaces the earlier agent.
    pub fn register(&self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        let mut inner = self.inner.write();
        if inner.agents.insert(name.clone(), Arc::clone(&agent)).is_some() {
            warn!("agent '{}' is being overwritten", name);
        } else {
            inner.order.push(name.clone());
        }
        info!("agent registered: {} ({})", name, agent.display_name());
    }

    /// Look up an agent by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.inner.read().agents.get(name).map(Arc::clone)
    }

    /// All agents in registration order.
    pub fn all(&self) -> Vec<Arc<dyn Agent>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.agents.get(name).map(Arc::clone))
            .collect()
    }

    /// All agent names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().order.clone()
    }

    pub fn count(&self) -> usize {
        self.inner.read().agents.len()
    }

    /// Best agent for an intent text, or None when nothing scores.
    pub fn find_for_intent(&self, text: &str) -> Option<Arc<dyn Agent>> {
        let mut best: Option<(f32, Arc<dyn Agent>)> = None;
        for agent in self.all() {
            let score = agent.matches_intent(text);
            if score > best.as_ref().map(|(s, _)| *s).unwrap_or(0.0) {
                best = Some((score, agent));
            }
        }
        best.map(|(score, agent)| {
            info!(
                "intent routing: '{}' -> {} (score={:.2})",
                text.chars().take(50).collect::<String>(),
                agent.name(),
                score
            );
            agent
        })
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
