//! The hub agent ("Zentrale"): greets unlocked callers and forwards
//! them to the right specialist agent.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::info;

use crate::agent::{Agent, AgentError};
use crate::manager::{MAIN_AGENT_NAME, SECURITY_AGENT_NAME};
use crate::registry::AgentRegistry;
use crate::tool::{function_tool, ToolResult};

const INSTRUCTIONS: &str = "Du bist die Zentrale der Voxgate Plattform.

=== DEIN STIL ===
- Professionell, praezise und effizient
- Antworte IMMER so kurz wie moeglich - maximal 1-2 Saetze
- Wiederhole NIEMALS was der Anrufer gesagt hat
- Kein Geplaenkel, kein Fuelltext, kein Smalltalk
- Komm sofort zum Punkt

=== BEGRUESSUNG ===
\"Hallo, Sie sind in der Zentrale.\"

=== WEITERLEITUNG ===
Wenn du erkennst wohin der Anrufer moechte:
- Sage kurz: \"Alles klar, ich verbinde dich mit dem [Agent-Name].\"
- Nutze dann SOFORT das Tool 'wechsel_zu_agent'

Wenn der Anrufer fragt was du kannst, nutze 'zeige_optionen' und stelle die Moeglichkeiten vor.

=== REGELN ===
- Halte Antworten ULTRA-KURZ (1-2 Saetze maximal)
- Wiederhole NICHT was der Anrufer gesagt hat - handle direkt
- Wenn unklar: Frage kurz und direkt nach
- KEIN Smalltalk - du bist eine effiziente Vermittlung
- Leite so schnell wie moeglich zum richtigen Agenten weiter";

/// Greets callers and hands them to specialist agents.
///
/// Holds a weak registry reference (set after registration, since the
/// registry owns the agents) for the dynamic specialist list.
pub struct MainAgent {
    registry: RwLock<Option<Weak<AgentRegistry>>>,
}

impl MainAgent {
    pub fn new() -> Self {
        MainAgent {
            registry: RwLock::new(None),
        }
    }

    /// Wire the registry in once it exists.
    pub fn set_registry(&self, registry: &Arc<AgentRegistry>) {
        *self.registry.write() = Some(Arc::downgrade(registry));
    }

    fn registry(&self) -> Option<Arc<AgentRegistry>> {
        self.registry.read().as_ref().and_then(Weak::upgrade)
    }

    /// All specialist agents: everything except the hub and the gate.
    fn specialists(&self) -> Vec<(String, String, String)> {
        let Some(registry) = self.registry() else {
            return Vec::new();
        };
        registry
            .all()
            .into_iter()
            .filter(|a| a.name() != MAIN_AGENT_NAME && a.name() != SECURITY_AGENT_NAME)
            .map(|a| {
                (
                    a.name().to_string(),
                    a.display_name().to_string(),
                    a.description().to_string(),
                )
            })
            .collect()
    }

    fn switch_to(&self, args: &Value) -> ToolResult {
        let target = args
            .get("agent_name")
            .and_then(Value::as_str)
            .unwrap_or("");
        if target.is_empty() {
            return ToolResult::text("Fehler: Kein Agent angegeben.");
        }

        if let Some(registry) = self.registry() {
            if registry.get(target).is_none() {
                let available: Vec<String> =
                    self.specialists().into_iter().map(|(n, _, _)| n).collect();
                return ToolResult::text(format!(
                    "Agent '{}' nicht gefunden. Verfuegbar: {}",
                    target,
                    available.join(", ")
                ));
            }
        }

        info!("hub forwarding caller to {}", target);
        ToolResult::Switch(target.to_string())
    }

    fn list_options(&self) -> ToolResult {
        let specialists = self.specialists();
        if specialists.is_empty() {
            return ToolResult::text("Aktuell sind keine Fachagenten verfuegbar.");
        }

        let mut lines = vec![format!(
            "=== {} Fachagenten verfuegbar ===\n",
            specialists.len()
        )];
        for (_, display, description) in &specialists {
            lines.push(format!("- {}: {}", display, description));
        }
        lines.push("\nSage einfach den Namen des Agenten um dich verbinden zu lassen.".into());
        ToolResult::Text(lines.join("\n"))
    }
}

impl Default for MainAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for MainAgent {
    fn name(&self) -> &str {
        MAIN_AGENT_NAME
    }

    fn display_name(&self) -> &str {
        "Zentrale"
    }

    fn description(&self) -> &str {
        "Begruesst Anrufer und leitet zum passenden Fachagenten weiter."
    }

    fn capabilities(&self) -> Vec<&str> {
        vec!["navigation", "weiterleitung", "uebersicht"]
    }

    fn keywords(&self) -> Vec<&str> {
        vec![
            "zentrale",
            "hauptmenue",
            "menue",
            "zurueck",
            "optionen",
            "was kannst du",
            "hilfe",
            "start",
        ]
    }

    fn tools(&self) -> Vec<Value> {
        let names: Vec<String> = self.specialists().into_iter().map(|(n, _, _)| n).collect();
        let enum_values = if names.is_empty() {
            json!(["code_agent", "ideas_agent"])
        } else {
            json!(names)
        };
        vec![
            function_tool(
                "wechsel_zu_agent",
                "Wechselt zum gewuenschten Fachagenten. Nutze dies sobald klar ist wohin der Anrufer moechte.",
                json!({
                    "type": "object",
                    "properties": {
                        "agent_name": {
                            "type": "string",
                            "enum": enum_values,
                            "description": "Name des Ziel-Agenten"
                        }
                    },
                    "required": ["agent_name"]
                }),
            ),
            function_tool(
                "zeige_optionen",
                "Listet alle verfuegbaren Fachagenten mit Beschreibung auf. Nutze dies wenn der Anrufer fragt was es gibt.",
                json!({"type": "object", "properties": {}, "required": []}),
            ),
        ]
    }

    fn instructions(&self) -> String {
        let mut instructions = INSTRUCTIONS.to_string();
        let specialists = self.specialists();
        if !specialists.is_empty() {
            instructions.push_str("\n\n=== VERFUEGBARE AGENTEN ===");
            for (name, display, description) in specialists {
                instructions.push_str(&format!("\n- {} ({}): {}", display, name, description));
            }
        }
        instructions
    }

    async fn execute_tool(&self, name: &str, args: &Value) -> Result<ToolResult, AgentError> {
        info!("hub tool: {}({})", name, args);
        match name {
            "wechsel_zu_agent" => Ok(self.switch_to(args)),
            "zeige_optionen" => Ok(self.list_options()),
            other => Err(AgentError::UnknownTool(other.to_string())),
        }
    }
}
