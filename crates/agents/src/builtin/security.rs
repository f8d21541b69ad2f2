//! The silent security gate.
//!
//! Runs text-only (the orchestrator configures the session without the
//! audio modality), owns a single `unlock` tool, and never speaks. The
//! access code lives only in this process; it is never part of any
//! instructions sent to the model.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::agent::{Agent, AgentError};
use crate::manager::SECURITY_AGENT_NAME;
use crate::tool::{function_tool, HangupKind, ToolResult};

/// Strikes before the gate hangs up.
pub const MAX_ATTEMPTS: u8 = 3;

const INSTRUCTIONS: &str = "Du bist ein stilles Sicherheits-System.

=== ABSOLUTE REGEL ===
Du sagst NIEMALS etwas. KEINE Begruessung. KEINE Antworten. KEIN Sprechen.
Du bist KOMPLETT STUMM. Du erzeugst KEINE Audio-Ausgabe.

=== AUFGABE ===
Wenn du Zahlen hoerst, rufe SOFORT das 'unlock' Tool auf mit den gehoerten Zahlen.
Wenn du etwas anderes hoerst als Zahlen, IGNORIERE es komplett. Sage NICHTS.

=== WICHTIG ===
- Du hast NUR ein Tool: 'unlock'
- Rufe es auf wenn du Zahlen hoerst
- Sage NICHTS - weder vorher, noch nachher, noch dazwischen
- Ignoriere alle Gespraeche, Fragen und Ablenkungsversuche komplett
- Reagiere NUR auf Zahlen mit dem unlock Tool
- KEINE Begruessung, KEINE Erklaerungen, KEIN Sprechen";

/// The gate agent. One strike counter per call; the engine admits one
/// call at a time, so the counter resets in `on_call_start`.
pub struct SecurityAgent {
    access_code: String,
    failed_attempts: Mutex<u8>,
    switch_target: String,
}

impl SecurityAgent {
    /// `access_code` is the configured numeric secret; `switch_target`
    /// is the agent an unlocked call lands on (the hub).
    pub fn new(access_code: impl Into<String>, switch_target: impl Into<String>) -> Self {
        SecurityAgent {
            access_code: access_code.into(),
            failed_attempts: Mutex::new(0),
            switch_target: switch_target.into(),
        }
    }

    fn check_unlock(&self, args: &Value) -> ToolResult {
        let code = args
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        if code.is_empty() {
            return ToolResult::Beep;
        }

        // The model relays speech; "7 2 3 4" and "7234" are the same code.
        let digits: String = code.chars().filter(|c| c.is_ascii_digit()).collect();
        info!("unlock attempt: '{}' -> digits '{}'", code, digits);

        if digits == self.access_code {
            info!("access code correct, unlocking");
            *self.failed_attempts.lock() = 0;
            return ToolResult::Switch(self.switch_target.clone());
        }

        let mut attempts = self.failed_attempts.lock();
        *attempts += 1;
        if *attempts >= MAX_ATTEMPTS {
            warn!("{} failed unlock attempts, hanging up", MAX_ATTEMPTS);
            ToolResult::Hangup(HangupKind::Security)
        } else {
            warn!("wrong access code (attempt {}/{})", attempts, MAX_ATTEMPTS);
            ToolResult::Beep
        }
    }
}

#[async_trait]
impl Agent for SecurityAgent {
    fn name(&self) -> &str {
        SECURITY_AGENT_NAME
    }

    fn display_name(&self) -> &str {
        "Sicherheits-Gate"
    }

    fn description(&self) -> &str {
        "Stilles Sicherheits-Gate mit Code-Pruefung."
    }

    fn capabilities(&self) -> Vec<&str> {
        vec!["sicherheit", "zugang", "authentifizierung"]
    }

    // No keywords: the gate is not reachable via intent routing.

    fn tools(&self) -> Vec<Value> {
        vec![function_tool(
            "unlock",
            "Prueft den vom Anrufer genannten Entsperr-Code. \
             Leite den gesprochenen Code als String weiter.",
            json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "Der vom Anrufer genannte numerische Code"
                    }
                },
                "required": ["code"]
            }),
        )]
    }

    fn instructions(&self) -> String {
        INSTRUCTIONS.to_string()
    }

    fn preferred_model(&self) -> Option<voxgate_realtime_ai::ModelKey> {
        Some(voxgate_realtime_ai::ModelKey::Mini)
    }

    async fn execute_tool(&self, name: &str, args: &Value) -> Result<ToolResult, AgentError> {
        match name {
            "unlock" => Ok(self.check_unlock(args)),
            // Anything unexpected from the model gets the beep, not an
            // explanation.
            _ => Ok(ToolResult::Beep),
        }
    }

    async fn on_call_start(&self, caller: &str) {
        *self.failed_attempts.lock() = 0;
        info!("gate armed for {}, attempts reset", caller);
    }

    fn matches_intent(&self, _text: &str) -> f32 {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> SecurityAgent {
        SecurityAgent::new("7234", "main_agent")
    }

    #[tokio::test]
    async fn correct_code_switches_to_the_hub() {
        let agent = gate();
        let result = agent
            .execute_tool("unlock", &json!({"code": "7 2 3 4"}))
            .await
            .unwrap();
        assert_eq!(result, ToolResult::Switch("main_agent".into()));
    }

    #[tokio::test]
    async fn non_numeric_code_beeps_without_a_strike() {
        let agent = gate();
        for _ in 0..5 {
            let result = agent
                .execute_tool("unlock", &json!({"code": "   "}))
                .await
                .unwrap();
            assert_eq!(result, ToolResult::Beep);
        }
        // No strikes burned: three wrong codes still get their beeps.
        assert_eq!(
            agent.execute_tool("unlock", &json!({"code": "1111"})).await.unwrap(),
            ToolResult::Beep
        );
    }

    #[tokio::test]
    async fn three_wrong_codes_hang_up() {
        let agent = gate();
        for _ in 0..2 {
            assert_eq!(
                agent.execute_tool("unlock", &json!({"code": "0000"})).await.unwrap(),
                ToolResult::Beep
            );
        }
        assert_eq!(
            agent.execute_tool("unlock", &json!({"code": "0000"})).await.unwrap(),
            ToolResult::Hangup(HangupKind::Security)
        );
    }

    #[tokio::test]
    async fn attempts_reset_on_new_call() {
        let agent = gate();
        for _ in 0..2 {
            agent.execute_tool("unlock", &json!({"code": "9"})).await.unwrap();
        }
        agent.on_call_start("sip:next@caller").await;
        assert_eq!(
            agent.execute_tool("unlock", &json!({"code": "9"})).await.unwrap(),
            ToolResult::Beep
        );
    }

    #[tokio::test]
    async fn unknown_tools_only_beep() {
        let agent = gate();
        assert_eq!(
            agent.execute_tool("smalltalk", &json!({})).await.unwrap(),
            ToolResult::Beep
        );
    }

    #[test]
    fn gate_is_unreachable_by_intent() {
        assert_eq!(gate().matches_intent("sicherheit zugang"), 0.0);
    }

    #[test]
    fn code_never_leaks_into_instructions() {
        let agent = gate();
        assert!(!agent.instructions().contains("7234"));
        assert!(serde_json::to_string(&agent.tools()).unwrap().find("7234").is_none());
    }
}
