//! Per-call state owned by the orchestrator.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;

use voxgate_agents::{AgentManager, IntentRouter};
use voxgate_realtime_ai::{ModelKey, RealtimeSession, TranscriptRole, UsageSnapshot};
use voxgate_sip_engine::CallHandle;

use crate::pricing::delta_cost_cents;
use crate::store::CallRecord;

/// One transcript line kept for persistence.
#[derive(Debug, Clone)]
pub struct TranscriptLine {
    pub role: TranscriptRole,
    pub text: String,
}

struct Accounting {
    /// The caller's sticky model choice; re-applied on agent switches
    /// unless the new agent forces its own model.
    user_model: ModelKey,
    /// Usage at the last cost computation; deltas are priced with the
    /// model active at that moment.
    last_usage: UsageSnapshot,
    cost_cents: f64,
    transcript: Vec<TranscriptLine>,
    agents_used: Vec<String>,
    /// First writer wins; set by whoever knows the real reason before
    /// the engine's generic one arrives.
    end_reason: Option<String>,
}

/// Everything the orchestrator holds for the active call.
pub struct ActiveCall {
    pub handle: CallHandle,
    pub caller: String,
    pub remote_ip: IpAddr,
    pub started_at: DateTime<Utc>,
    pub whitelisted: bool,
    pub session: RealtimeSession,
    pub manager: AgentManager,
    pub router: IntentRouter,
    accounting: Mutex<Accounting>,
    inactivity: Mutex<Option<JoinHandle<()>>>,
}

impl ActiveCall {
    pub fn new(
        handle: CallHandle,
        caller: String,
        remote_ip: IpAddr,
        whitelisted: bool,
        session: RealtimeSession,
        manager: AgentManager,
        router: IntentRouter,
    ) -> Self {
        ActiveCall {
            handle,
            caller,
            remote_ip,
            started_at: Utc::now(),
            whitelisted,
            session,
            manager,
            router,
            accounting: Mutex::new(Accounting {
                user_model: ModelKey::default(),
                last_usage: UsageSnapshot::default(),
                cost_cents: 0.0,
                transcript: Vec::new(),
                agents_used: Vec::new(),
                end_reason: None,
            }),
            inactivity: Mutex::new(None),
        }
    }

    pub fn user_model(&self) -> ModelKey {
        self.accounting.lock().user_model
    }

    pub fn set_user_model(&self, model: ModelKey) {
        self.accounting.lock().user_model = model;
    }

    /// Fold a cumulative usage snapshot into the cost accumulator.
    ///
    /// The delta against the previous snapshot is priced with `model`
    /// (the model that was live while those tokens accrued). Returns
    /// `(delta_cents, total_cents)`.
    pub fn apply_usage(&self, usage: UsageSnapshot, model: ModelKey) -> (f64, f64) {
        let mut acc = self.accounting.lock();
        let delta = usage.delta_since(&acc.last_usage);
        let cents = delta_cost_cents(&delta, model);
        acc.cost_cents += cents;
        acc.last_usage = usage;
        (cents, acc.cost_cents)
    }

    pub fn cost_cents(&self) -> f64 {
        self.accounting.lock().cost_cents
    }

    /// Keep a final transcript line for persistence.
    pub fn add_transcript(&self, role: TranscriptRole, text: &str) {
        self.accounting.lock().transcript.push(TranscriptLine {
            role,
            text: text.to_string(),
        });
    }

    /// Remember which agents served the call, in activation order.
    pub fn note_agent(&self, name: &str) {
        let mut acc = self.accounting.lock();
        if acc.agents_used.last().map(String::as_str) != Some(name) {
            acc.agents_used.push(name.to_string());
        }
    }

    /// Record the end reason; the first recorded reason wins over the
    /// engine's generic one.
    pub fn set_end_reason(&self, reason: &str) {
        let mut acc = self.accounting.lock();
        if acc.end_reason.is_none() {
            acc.end_reason = Some(reason.to_string());
        }
    }

    pub fn end_reason(&self) -> Option<String> {
        self.accounting.lock().end_reason.clone()
    }

    /// Replace the inactivity timer task.
    pub fn set_inactivity(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.inactivity.lock().replace(handle) {
            old.abort();
        }
    }

    /// Cancel the inactivity timer, if armed.
    pub fn cancel_inactivity(&self) {
        if let Some(task) = self.inactivity.lock().take() {
            task.abort();
        }
    }

    /// Build the persistence record at call end.
    pub fn to_record(&self, fallback_reason: &str) -> (CallRecord, String) {
        let acc = self.accounting.lock();
        let reason = acc
            .end_reason
            .clone()
            .unwrap_or_else(|| fallback_reason.to_string());
        let transcript = json!(acc
            .transcript
            .iter()
            .map(|line| json!({"role": line.role.as_str(), "text": line.text}))
            .collect::<Vec<_>>());
        (
            CallRecord {
                caller_id: self.caller.clone(),
                started_at: self.started_at,
                ended_at: Utc::now(),
                cost_cents: acc.cost_cents,
                transcript,
                agents_used: acc.agents_used.clone(),
                logs: String::new(),
            },
            reason,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use voxgate_agents::AgentRegistry;
    use voxgate_realtime_ai::SessionConfig;

    struct NullObserver;

    #[async_trait::async_trait]
    impl voxgate_realtime_ai::SessionObserver for NullObserver {
        async fn on_function_call(
            &self,
            _id: String,
            _name: String,
            _args: serde_json::Value,
        ) -> String {
            String::new()
        }
    }

    fn call() -> ActiveCall {
        let registry = Arc::new(AgentRegistry::new());
        ActiveCall::new(
            CallHandle::new("call-1"),
            "sip:+4915551234@trunk.test".into(),
            "217.10.79.9".parse().unwrap(),
            false,
            RealtimeSession::new(SessionConfig::new("k"), Arc::new(NullObserver)),
            AgentManager::new(Arc::clone(&registry), "security_agent"),
            IntentRouter::new(registry),
        )
    }

    #[test]
    fn usage_deltas_price_with_the_given_model() {
        let call = call();
        let first = UsageSnapshot {
            input_audio_tokens: 1_000_000,
            ..Default::default()
        };
        let (delta, total) = call.apply_usage(first, ModelKey::Mini);
        assert!((delta - 1000.0).abs() < 1e-9);
        assert!((total - 1000.0).abs() < 1e-9);

        // Next snapshot arrives after a switch to premium: only the
        // *new* tokens are priced, at the new model's rate.
        let second = UsageSnapshot {
            input_audio_tokens: 2_000_000,
            ..Default::default()
        };
        let (delta, total) = call.apply_usage(second, ModelKey::Premium);
        assert!((delta - 4000.0).abs() < 1e-9);
        assert!((total - 5000.0).abs() < 1e-9);
    }

    #[test]
    fn first_end_reason_wins() {
        let call = call();
        call.set_end_reason("security_timeout");
        call.set_end_reason("local_hangup");
        assert_eq!(call.end_reason().as_deref(), Some("security_timeout"));

        let (_, reason) = call.to_record("remote_bye");
        assert_eq!(reason, "security_timeout");
    }

    #[test]
    fn agents_used_deduplicates_consecutive_entries() {
        let call = call();
        call.note_agent("security_agent");
        call.note_agent("security_agent");
        call.note_agent("main_agent");
        let (record, _) = call.to_record("x");
        assert_eq!(record.agents_used, vec!["security_agent", "main_agent"]);
    }

    #[test]
    fn sticky_user_model_defaults_to_mini() {
        let call = call();
        assert_eq!(call.user_model(), ModelKey::Mini);
        call.set_user_model(ModelKey::Premium);
        assert_eq!(call.user_model(), ModelKey::Premium);
    }
}
