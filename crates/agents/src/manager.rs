//! Per-call active-agent management.
//!
//! Exactly one agent is active per call. The manager injects the two
//! global tools (hangup and model switch), enforces the security gate
//! on everything else, and folds tool failures into a short German
//! sentence so the model can respond gracefully.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{info, warn};

use voxgate_realtime_ai::ModelKey;

use crate::agent::Agent;
use crate::registry::AgentRegistry;
use crate::tool::{function_tool, HangupKind, ToolResult};

/// Name of the silent gate agent every locked call starts on.
pub const SECURITY_AGENT_NAME: &str = "security_agent";
/// Name of the hub agent unlocked calls land on.
pub const MAIN_AGENT_NAME: &str = "main_agent";

const HANGUP_TOOL: &str = "auflegen";
const MODEL_SWITCH_TOOL: &str = "model_wechseln";

fn hangup_tool() -> Value {
    function_tool(
        HANGUP_TOOL,
        "Beendet das Telefonat. Verwende dieses Tool wenn der Anrufer auflegen moechte, \
         sich verabschiedet oder sagt 'leg auf', 'tschuess', 'auf wiedersehen'.",
        json!({"type": "object", "properties": {}, "required": []}),
    )
}

fn model_switch_tool() -> Value {
    function_tool(
        MODEL_SWITCH_TOOL,
        "Wechselt das AI-Modell. Verwende wenn der Anrufer 'model premium', 'model teuer' \
         oder 'model schnell', 'model guenstig', 'model mini' sagt.",
        json!({
            "type": "object",
            "properties": {
                "model": {
                    "type": "string",
                    "enum": ["mini", "premium"],
                    "description": "mini = guenstig/schnell, premium = teuer/thinking"
                }
            },
            "required": ["model"]
        }),
    )
}

/// Holds the active agent for one call.
pub struct AgentManager {
    registry: Arc<AgentRegistry>,
    default_agent: String,
    active: RwLock<Option<Arc<dyn Agent>>>,
    caller: RwLock<Option<String>>,
    unlocked: AtomicBool,
}

impl AgentManager {
    /// `default_agent` is the agent every locked call starts on,
    /// normally the security gate.
    pub fn new(registry: Arc<AgentRegistry>, default_agent: impl Into<String>) -> Self {
        AgentManager {
            registry,
            default_agent: default_agent.into(),
            active: RwLock::new(None),
            caller: RwLock::new(None),
            unlocked: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn active_agent(&self) -> Option<Arc<dyn Agent>> {
        self.active.read().clone()
    }

    pub fn active_agent_name(&self) -> Option<String> {
        self.active.read().as_ref().map(|a| a.name().to_string())
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::SeqCst)
    }

    pub fn set_unlocked(&self, unlocked: bool) {
        self.unlocked.store(unlocked, Ordering::SeqCst);
        info!("call unlock status: {}", unlocked);
    }

    /// Begin a call: every call starts locked on `initial_agent` (or
    /// the default). Fires `on_call_start` and `on_activated`.
    pub async fn start_call(&self, caller: &str, initial_agent: Option<&str>) {
        *self.caller.write() = Some(caller.to_string());
        self.unlocked.store(false, Ordering::SeqCst);

        let target = initial_agent.unwrap_or(&self.default_agent);
        let agent = self
            .registry
            .get(target)
            .or_else(|| self.registry.all().into_iter().next());

        match agent {
            Some(agent) => {
                *self.active.write() = Some(Arc::clone(&agent));
                agent.on_call_start(caller).await;
                agent.on_activated().await;
                info!("call started: {} -> agent {}", caller, agent.name());
            }
            None => warn!("no agent available for call from {}", caller),
        }
    }

    /// End the call: fires the end/deactivate hooks and resets state.
    pub async fn end_call(&self) {
        let (agent, caller) = {
            (
                self.active.write().take(),
                self.caller.write().take(),
            )
        };
        if let (Some(agent), Some(caller)) = (agent, caller) {
            agent.on_call_end(&caller).await;
            agent.on_deactivated().await;
            info!("call ended: {} (agent {})", caller, agent.name());
        }
        self.unlocked.store(false, Ordering::SeqCst);
    }

    /// Switch the active agent. Switching to the current agent is a
    /// no-op; an unknown name is a no-op with a warning.
    pub async fn switch_agent(&self, name: &str) -> bool {
        let Some(new_agent) = self.registry.get(name) else {
            warn!("agent '{}' not found", name);
            return false;
        };

        let old = self.active.read().clone();
        if let Some(old) = &old {
            if old.name() == name {
                info!("agent '{}' is already active", name);
                return true;
            }
        }

        if let Some(old) = &old {
            old.on_deactivated().await;
        }
        *self.active.write() = Some(Arc::clone(&new_agent));
        new_agent.on_activated().await;

        let caller = self.caller.read().clone();
        if let Some(caller) = caller {
            new_agent.on_call_start(&caller).await;
        }

        info!(
            "agent switched: {} -> {}",
            old.map(|a| a.name().to_string()).unwrap_or_else(|| "none".into()),
            name
        );
        true
    }

    /// The active agent's tools plus the global ones. The model-switch
    /// tool is withheld while an agent forces its own model.
    pub fn tools(&self) -> Vec<Value> {
        let Some(agent) = self.active_agent() else {
            return Vec::new();
        };
        let mut tools = agent.tools();
        tools.push(hangup_tool());
        if agent.preferred_model().is_none() {
            tools.push(model_switch_tool());
        }
        tools
    }

    /// The active agent's instructions.
    pub fn instructions(&self) -> String {
        self.active_agent()
            .map(|a| a.instructions())
            .unwrap_or_default()
    }

    /// Run one tool call: global tools first, then the gate check,
    /// then the active agent. Failures become a short German sentence.
    pub async fn execute_tool(&self, name: &str, args: &Value) -> ToolResult {
        let Some(agent) = self.active_agent() else {
            return ToolResult::text("Fehler: Kein Agent aktiv.");
        };

        if name == HANGUP_TOOL {
            info!("caller requested hangup");
            return ToolResult::Hangup(HangupKind::User);
        }

        if name == MODEL_SWITCH_TOOL {
            let wanted = args.get("model").and_then(Value::as_str).unwrap_or("mini");
            return match ModelKey::from_str(wanted) {
                Ok(key) => {
                    info!("model switch requested: {}", key);
                    ToolResult::ModelSwitch(key)
                }
                Err(_) => ToolResult::text(format!("Unbekanntes Modell: {}", wanted)),
            };
        }

        // Security gate: a locked call may only talk to the gate.
        if !self.is_unlocked() && agent.name() != SECURITY_AGENT_NAME {
            warn!("tool '{}' blocked, call not unlocked", name);
            return ToolResult::text(
                "Fehler: Anruf nicht freigeschaltet. Bitte zuerst den Zugangs-Code eingeben.",
            );
        }

        match agent.execute_tool(name, args).await {
            Ok(result) => result,
            Err(e) => {
                warn!("tool execution failed: {} - {}", name, e);
                ToolResult::text(format!("Fehler bei {}: {}", name, e))
            }
        }
    }
}
