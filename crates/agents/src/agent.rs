//! The agent trait.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use voxgate_realtime_ai::ModelKey;

use crate::tool::ToolResult;

/// Errors an agent's tool execution may raise. The manager folds them
/// into a caller-friendly German sentence; they never escape to the
/// model verbatim.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The agent does not implement the named tool.
    #[error("unbekannte Funktion: {0}")]
    UnknownTool(String),

    /// Anything that went wrong inside the tool.
    #[error("{0}")]
    Tool(String),
}

/// One conversational role: tools, instructions and tool execution.
///
/// Agents are shared read-only across the process; implementations
/// must tolerate concurrent `execute_tool` calls (interior state goes
/// behind a lock).
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable unique identifier (`security_agent`, `main_agent`, ...).
    fn name(&self) -> &str;

    /// Human-readable name for the dashboard.
    fn display_name(&self) -> &str;

    /// One-line description, shown to callers by the hub agent.
    fn description(&self) -> &str;

    /// Capability keywords for status displays.
    fn capabilities(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Keywords scored by [`Agent::matches_intent`].
    fn keywords(&self) -> Vec<&str> {
        Vec::new()
    }

    /// Realtime-API tool definitions.
    fn tools(&self) -> Vec<Value>;

    /// The system prompt for this agent.
    fn instructions(&self) -> String;

    /// A model this agent insists on, overriding the caller's sticky
    /// choice while the agent is active.
    fn preferred_model(&self) -> Option<ModelKey> {
        None
    }

    /// Execute one tool call.
    async fn execute_tool(&self, name: &str, args: &Value) -> Result<ToolResult, AgentError>;

    /// A call began with this agent active.
    async fn on_call_start(&self, _caller: &str) {}

    /// The call this agent served ended.
    async fn on_call_end(&self, _caller: &str) {}

    /// This agent became the active one.
    async fn on_activated(&self) {}

    /// This agent stopped being the active one.
    async fn on_deactivated(&self) {}

    /// Bag-of-keywords intent score in [0, 1].
    fn matches_intent(&self, text: &str) -> f32 {
        let text = text.to_lowercase();
        let mut score = 0.0f32;
        for keyword in self.keywords() {
            if text.contains(&keyword.to_lowercase()) {
                score += 0.3;
            }
        }
        score.min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Probe;

    #[async_trait]
    impl Agent for Probe {
        fn name(&self) -> &str {
            "probe"
        }
        fn display_name(&self) -> &str {
            "Probe"
        }
        fn description(&self) -> &str {
            "test agent"
        }
        fn keywords(&self) -> Vec<&str> {
            vec!["idee", "projekt", "notiz", "brainstorm"]
        }
        fn tools(&self) -> Vec<Value> {
            Vec::new()
        }
        fn instructions(&self) -> String {
            String::new()
        }
        async fn execute_tool(&self, name: &str, _args: &Value) -> Result<ToolResult, AgentError> {
            Err(AgentError::UnknownTool(name.to_string()))
        }
    }

    #[test]
    fn intent_score_accumulates_per_keyword_and_caps() {
        let agent = Probe;
        assert_eq!(agent.matches_intent("hallo welt"), 0.0);
        let one = agent.matches_intent("ich habe eine Idee");
        assert!((one - 0.3).abs() < f32::EPSILON);
        let all = agent.matches_intent("idee projekt notiz brainstorm idee");
        assert!((all - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn unknown_tool_error_formats_in_german() {
        let err = Probe
            .execute_tool("nope", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unbekannte Funktion: nope");
    }
}
