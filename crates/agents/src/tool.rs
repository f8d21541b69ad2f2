//! Tool schemas and the typed tool-result channel.

use serde_json::{json, Value};

use voxgate_realtime_ai::ModelKey;

/// Build a realtime-API function tool definition.
///
/// `parameters` is a JSON schema object; pass `json!({"type": "object",
/// "properties": {}, "required": []})` for parameterless tools.
pub fn function_tool(name: &str, description: &str, parameters: Value) -> Value {
    json!({
        "type": "function",
        "name": name,
        "description": description,
        "parameters": parameters,
    })
}

/// Why a tool asked for the call to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HangupKind {
    /// The security gate gave up on the caller; a failed attempt is
    /// recorded and the auto-blacklist check runs.
    Security,
    /// The caller said goodbye; no strike bookkeeping.
    User,
}

/// What a tool execution asks the orchestrator to do.
///
/// Everything except `Text` and `QuietText` is a control action; the
/// orchestrator consumes it and substitutes a human-readable sentence
/// before anything reaches the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResult {
    /// Plain result text, delivered to the model as the function output.
    Text(String),
    /// Switch the active agent to the named one.
    Switch(String),
    /// End the call.
    Hangup(HangupKind),
    /// Play the gate beep (and mute the AI until its response ends).
    Beep,
    /// The caller chose a model; sticky for the rest of the call.
    ModelSwitch(ModelKey),
    /// Deliver text but do not trigger a new response (silent gate path).
    QuietText(String),
}

impl ToolResult {
    /// Convenience constructor for text results.
    pub fn text(s: impl Into<String>) -> Self {
        ToolResult::Text(s.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_tool_has_the_realtime_shape() {
        let tool = function_tool(
            "unlock",
            "Prueft den Code",
            json!({"type": "object", "properties": {}, "required": []}),
        );
        assert_eq!(tool["type"], "function");
        assert_eq!(tool["name"], "unlock");
        assert!(tool["parameters"].is_object());
    }
}
