//! Transcript-driven intent routing.
//!
//! Keeps a short ring of recent transcript segments per call and
//! suggests an agent switch when a segment scores for a different
//! agent than the active one.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::registry::AgentRegistry;

const HISTORY_LIMIT: usize = 20;

/// One remembered transcript segment.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub role: String,
    pub text: String,
}

/// Per-call intent router.
pub struct IntentRouter {
    registry: Arc<AgentRegistry>,
    history: Mutex<VecDeque<TranscriptEntry>>,
    current_agent: Mutex<Option<String>>,
}

impl IntentRouter {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        IntentRouter {
            registry,
            history: Mutex::new(VecDeque::new()),
            current_agent: Mutex::new(None),
        }
    }

    /// Track the active agent so suggestions skip it.
    pub fn set_current_agent(&self, name: &str) {
        *self.current_agent.lock() = Some(name.to_string());
    }

    /// Forget everything (new call).
    pub fn clear(&self) {
        self.history.lock().clear();
        *self.current_agent.lock() = None;
    }

    /// Remember a transcript segment, keeping the last 20.
    pub fn add_transcript(&self, role: &str, text: &str) {
        let mut history = self.history.lock();
        history.push_back(TranscriptEntry {
            role: role.to_string(),
            text: text.to_string(),
        });
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
    }

    /// Suggest a switch target for this text, if a different agent
    /// scores for it.
    pub fn suggest_switch(&self, text: &str) -> Option<String> {
        let best = self.registry.find_for_intent(text)?;
        let current = self.current_agent.lock().clone();
        if current.as_deref() == Some(best.name()) {
            return None;
        }
        info!(
            "agent switch suggested: {:?} -> {}",
            current,
            best.name()
        );
        Some(best.name().to_string())
    }

    /// Short context summary of the last ten segments, for handing a
    /// new agent the conversation so far.
    pub fn context_summary(&self) -> String {
        let history = self.history.lock();
        history
            .iter()
            .rev()
            .take(10)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|e| {
                let who = if e.role == "caller" { "Anrufer" } else { "Assistent" };
                format!("{}: {}", who, e.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
