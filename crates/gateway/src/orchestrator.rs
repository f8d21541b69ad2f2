//! The orchestrator: glue between the SIP engine, the realtime AI
//! session, the agent manager and persistence.
//!
//! It owns no domain state of its own (everything lives in the
//! per-call [`ActiveCall`]) and interprets the typed tool results
//! (switch, hangup, beep, model switch) that drive the call.

use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

use voxgate_agents::{
    builtin::{MainAgent, SecurityAgent},
    AgentManager, AgentRegistry, HangupKind, IntentRouter, ToolResult, MAIN_AGENT_NAME,
    SECURITY_AGENT_NAME,
};
use voxgate_media_core::{ai_output_to_sip, beep_pcm48, sip_to_ai_input};
use voxgate_realtime_ai::{
    AiState, ModelKey, RealtimeSession, SessionConfig, SessionObserver, TranscriptRole,
    UsageSnapshot, BEEP_QUIET_PREFIX, MODEL_SWITCHED_SENTINEL,
};
use voxgate_sip_engine::{CallHandle, SipEngineEvent, SipEngineHandle};

use crate::call::ActiveCall;
use crate::config::GatewayConfig;
use crate::dashboard::{broadcast as emit, DashboardCommand, DashboardMessage};
use crate::firewall::TrunkFirewall;
use crate::store::{BlacklistStore, CallLogStore};

/// The pre-generated gate beep (48 kHz PCM16).
static BEEP: Lazy<Vec<u8>> = Lazy::new(beep_pcm48);

/// Builds the default agent registry: the gate and the hub. Domain
/// agents are registered behind them by the embedding application.
pub fn default_registry(access_code: &str) -> Arc<AgentRegistry> {
    let registry = Arc::new(AgentRegistry::new());
    let hub = Arc::new(MainAgent::new());
    hub.set_registry(&registry);
    registry.register(Arc::new(SecurityAgent::new(access_code, MAIN_AGENT_NAME)));
    registry.register(hub);
    registry
}

/// The gateway orchestrator.
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: GatewayConfig,
    engine: SipEngineHandle,
    registry: Arc<AgentRegistry>,
    blacklist: BlacklistStore,
    call_log: CallLogStore,
    firewall: Arc<TrunkFirewall>,
    updates: broadcast::Sender<DashboardMessage>,
    current: Mutex<Option<Arc<ActiveCall>>>,
}

impl Orchestrator {
    pub fn new(
        config: GatewayConfig,
        engine: SipEngineHandle,
        registry: Arc<AgentRegistry>,
        blacklist: BlacklistStore,
        call_log: CallLogStore,
        firewall: Arc<TrunkFirewall>,
        updates: broadcast::Sender<DashboardMessage>,
    ) -> Self {
        Orchestrator {
            inner: Arc::new(Inner {
                config,
                engine,
                registry,
                blacklist,
                call_log,
                firewall,
                updates,
                current: Mutex::new(None),
            }),
        }
    }

    /// Snapshot for the dashboard's initial status message.
    pub fn status_provider(&self) -> Arc<dyn Fn() -> DashboardMessage + Send + Sync> {
        let inner = Arc::clone(&self.inner);
        Arc::new(move || {
            let active_agent = inner
                .current
                .try_lock()
                .ok()
                .and_then(|guard| guard.as_ref().map(|c| c.manager.active_agent_name()))
                .flatten();
            DashboardMessage::Status {
                sip_registered: inner.engine.is_registered(),
                call_active: inner.engine.current_call().is_some(),
                active_agent,
                available_agents: inner.registry.names(),
            }
        })
    }

    /// Main loop: engine events plus dashboard commands, until the
    /// engine event channel closes.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<SipEngineEvent>,
        mut commands: mpsc::Receiver<DashboardCommand>,
    ) {
        emit(
            &self.inner.updates,
            DashboardMessage::FirewallStatus {
                enabled: self.inner.firewall.is_enabled(),
            },
        );

        let mut commands_open = true;
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        warn!("engine event channel closed, orchestrator stopping");
                        break;
                    };
                    self.inner.handle_engine_event(event).await;
                }
                command = commands.recv(), if commands_open => {
                    match command {
                        Some(command) => self.inner.handle_command(command).await,
                        None => commands_open = false,
                    }
                }
            }
        }
    }
}

impl Inner {
    async fn current_call(&self, handle: &CallHandle) -> Option<Arc<ActiveCall>> {
        let guard = self.current.lock().await;
        guard
            .as_ref()
            .filter(|call| &call.handle == handle)
            .map(Arc::clone)
    }

    async fn handle_engine_event(self: &Arc<Self>, event: SipEngineEvent) {
        match event {
            SipEngineEvent::RegistrationChanged { registered } => {
                emit(
                    &self.updates,
                    DashboardMessage::Status {
                        sip_registered: registered,
                        call_active: self.engine.current_call().is_some(),
                        active_agent: None,
                        available_agents: self.registry.names(),
                    },
                );
            }

            SipEngineEvent::IncomingCall {
                call,
                caller_uri,
                remote_ip,
            } => {
                self.handle_incoming(call, caller_uri, remote_ip).await;
            }

            SipEngineEvent::CallActive { call, codec } => {
                let Some(active) = self.current_call(&call).await else {
                    return;
                };
                info!("call active with codec {:?}", codec);
                emit(
                    &self.updates,
                    DashboardMessage::CallActive {
                        caller: active.caller.clone(),
                    },
                );
                if active.whitelisted {
                    // Trusted callers skip the gate and get the spoken
                    // greeting right away.
                    active.session.trigger_greeting().await;
                } else {
                    self.restart_inactivity(&active);
                }
            }

            SipEngineEvent::AudioReceived { call, pcm48 } => {
                if let Some(active) = self.current_call(&call).await {
                    active.session.send_audio(&sip_to_ai_input(&pcm48)).await;
                }
            }

            SipEngineEvent::CallEnded { call, reason } => {
                let taken = {
                    let mut guard = self.current.lock().await;
                    match guard.as_ref() {
                        Some(active) if active.handle == call => guard.take(),
                        _ => None,
                    }
                };
                if let Some(active) = taken {
                    self.finish_call(active, &reason).await;
                } else {
                    debug!("unanswered call {} ended: {}", call, reason);
                }
            }
        }
    }

    /// Pre-accept policy and call setup. Order matters: blacklist
    /// first (most specific), then the trunk firewall, then the
    /// whitelist shortcut.
    async fn handle_incoming(
        self: &Arc<Self>,
        call: CallHandle,
        caller_uri: String,
        remote_ip: std::net::IpAddr,
    ) {
        info!("incoming call: {} from {}", caller_uri, remote_ip);
        emit(
            &self.updates,
            DashboardMessage::CallIncoming {
                caller: caller_uri.clone(),
            },
        );

        let blacklisted = self
            .blacklist
            .is_blacklisted(&caller_uri)
            .await
            .unwrap_or_else(|e| {
                error!("blacklist lookup failed: {}", e);
                false
            });
        if blacklisted {
            warn!("rejecting blacklisted caller {}", caller_uri);
            let _ = self.engine.reject(&call, 403).await;
            emit(
                &self.updates,
                DashboardMessage::CallRejected {
                    caller: caller_uri,
                    reason: "blacklisted".into(),
                },
            );
            return;
        }

        if !self.firewall.allows(remote_ip, &caller_uri) {
            let _ = self.engine.reject(&call, 403).await;
            emit(
                &self.updates,
                DashboardMessage::CallRejected {
                    caller: caller_uri,
                    reason: "firewall".into(),
                },
            );
            return;
        }

        let whitelisted = self
            .blacklist
            .is_whitelisted(&caller_uri)
            .await
            .unwrap_or(false);

        // Assemble the per-call state.
        let manager = AgentManager::new(Arc::clone(&self.registry), SECURITY_AGENT_NAME);
        let router = IntentRouter::new(Arc::clone(&self.registry));
        let observer = Arc::new(CallObserver {
            inner: Arc::clone(self),
            call: OnceLock::new(),
        });
        let session = RealtimeSession::new(
            SessionConfig {
                api_key: self.config.api_key.clone(),
                base_url: self.config.realtime_base_url.clone(),
                voice: "alloy".into(),
            },
            Arc::clone(&observer) as Arc<dyn SessionObserver>,
        );

        let active = Arc::new(ActiveCall::new(
            call.clone(),
            caller_uri.clone(),
            remote_ip,
            whitelisted,
            session,
            manager,
            router,
        ));
        let _ = observer.call.set(Arc::downgrade(&active));

        // Whitelisted callers start unlocked on the hub with speech;
        // everyone else faces the silent gate.
        if whitelisted {
            info!("caller {} is whitelisted, skipping the gate", caller_uri);
            active.manager.start_call(&caller_uri, Some(MAIN_AGENT_NAME)).await;
            active.manager.set_unlocked(true);
        } else {
            active.manager.start_call(&caller_uri, None).await;
        }

        let Some(agent) = active.manager.active_agent() else {
            error!("no agent available, rejecting call");
            let _ = self.engine.reject(&call, 480).await;
            return;
        };
        active.note_agent(agent.name());
        active.router.set_current_agent(agent.name());

        let text_only = !whitelisted;
        let model = agent.preferred_model().unwrap_or(active.user_model());
        active.session.set_model(model);
        active.session.configure_for_agent(
            active.manager.tools(),
            active.manager.instructions(),
            text_only,
        );

        *self.current.lock().await = Some(Arc::clone(&active));

        if let Err(e) = active.session.connect().await {
            error!("realtime session connect failed: {}", e);
            *self.current.lock().await = None;
            let _ = self.engine.reject(&call, 480).await;
            emit(
                &self.updates,
                DashboardMessage::CallRejected {
                    caller: caller_uri,
                    reason: "ai_unavailable".into(),
                },
            );
            return;
        }

        if let Err(e) = self.engine.accept(&call).await {
            error!("SIP accept failed: {}", e);
            active.session.disconnect().await;
            *self.current.lock().await = None;
            let _ = self.engine.hangup(&call).await;
        }
    }

    /// Common exit path: hooks, disconnect, persistence, broadcast.
    async fn finish_call(self: &Arc<Self>, active: Arc<ActiveCall>, engine_reason: &str) {
        active.cancel_inactivity();
        active.manager.end_call().await;
        active.session.disconnect().await;
        active.router.clear();

        let (record, reason) = active.to_record(engine_reason);
        let duration = (record.ended_at - record.started_at).num_seconds().max(0);
        if let Err(e) = self.call_log.record(&record).await {
            error!("failed to persist call: {}", e);
        }

        info!(
            "call finished: {} ({}, {}s, {:.2} ct)",
            active.caller, reason, duration, record.cost_cents
        );
        emit(
            &self.updates,
            DashboardMessage::CallEnded {
                caller: active.caller.clone(),
                reason,
                duration_seconds: duration,
                cost_cents: record.cost_cents,
            },
        );
    }

    /// Arm (or re-arm) the gate's 15 s silence timer.
    fn restart_inactivity(self: &Arc<Self>, active: &Arc<ActiveCall>) {
        let inner = Arc::clone(self);
        let weak = Arc::downgrade(active);
        let timeout = self.config.inactivity_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(active) = weak.upgrade() else {
                return;
            };
            warn!("security gate timeout for {}", active.caller);
            if let Err(e) = inner.blacklist.record_failed_call(&active.caller).await {
                error!("failed to record timeout strike: {}", e);
            }
            match inner.blacklist.check_and_auto_blacklist(&active.caller).await {
                Ok(true) => emit(&inner.updates, DashboardMessage::BlacklistUpdated),
                Ok(false) => {}
                Err(e) => error!("auto-blacklist check failed: {}", e),
            }
            active.set_end_reason("security_timeout");
            let _ = inner.engine.hangup(&active.handle).await;
        });
        active.set_inactivity(task);
    }

    /// Run one tool call, act on the typed result, and hand the model
    /// a plain string.
    async fn handle_tool_call(
        self: &Arc<Self>,
        active: &Arc<ActiveCall>,
        name: String,
        args: Value,
    ) -> String {
        emit(
            &self.updates,
            DashboardMessage::FunctionCall {
                name: name.clone(),
                args: args.clone(),
            },
        );

        let result = active.manager.execute_tool(&name, &args).await;

        match result {
            ToolResult::Text(text) => {
                emit(
                    &self.updates,
                    DashboardMessage::FunctionResult {
                        name,
                        result: text.clone(),
                    },
                );
                text
            }

            ToolResult::QuietText(text) => format!("{}{}", BEEP_QUIET_PREFIX, text),

            ToolResult::Beep => {
                // Wrong code: mute the (text-only) response, play the
                // tone, and give the caller a fresh silence budget.
                active.session.mute_until_response_done();
                self.engine.send_audio(&active.handle, &BEEP);
                self.restart_inactivity(active);
                "Falscher Code.".to_string()
            }

            ToolResult::Hangup(HangupKind::Security) => {
                active.session.set_muted(true);
                active.cancel_inactivity();
                if let Err(e) = self.blacklist.record_failed_call(&active.caller).await {
                    error!("failed to record strike: {}", e);
                }
                match self.blacklist.check_and_auto_blacklist(&active.caller).await {
                    Ok(true) => emit(&self.updates, DashboardMessage::BlacklistUpdated),
                    Ok(false) => {}
                    Err(e) => error!("auto-blacklist check failed: {}", e),
                }
                active.set_end_reason("security_hangup");
                let _ = self.engine.hangup(&active.handle).await;
                "Der Anruf wird beendet.".to_string()
            }

            ToolResult::Hangup(HangupKind::User) => {
                active.cancel_inactivity();
                active.set_end_reason("user_hangup");
                let _ = self.engine.hangup(&active.handle).await;
                "Auf Wiedersehen.".to_string()
            }

            ToolResult::ModelSwitch(model) => {
                active.set_user_model(model);
                if model == active.session.model() {
                    return format!("Modell {} ist bereits aktiv.", model.short_name());
                }
                match active.session.switch_model_live(model).await {
                    Ok(()) => MODEL_SWITCHED_SENTINEL.to_string(),
                    Err(e) => {
                        error!("live model switch failed: {}", e);
                        "Modellwechsel fehlgeschlagen.".to_string()
                    }
                }
            }

            ToolResult::Switch(target) => self.handle_agent_switch(active, &target).await,
        }
    }

    /// Agent switch: unlock (unless the target is the gate), apply the
    /// target's model preference, and update or replace the session.
    async fn handle_agent_switch(
        self: &Arc<Self>,
        active: &Arc<ActiveCall>,
        target: &str,
    ) -> String {
        let from = active.manager.active_agent_name();
        if !active.manager.switch_agent(target).await {
            return format!("Agent '{}' nicht gefunden.", target);
        }
        let Some(agent) = active.manager.active_agent() else {
            return "Fehler: Kein Agent aktiv.".to_string();
        };

        active.note_agent(target);
        active.router.set_current_agent(target);
        emit(
            &self.updates,
            DashboardMessage::AgentChanged {
                from,
                to: target.to_string(),
            },
        );

        let entering_gate = target == SECURITY_AGENT_NAME;
        if !entering_gate {
            // Leaving the gate: the call is now trusted.
            active.manager.set_unlocked(true);
            active.cancel_inactivity();
        }

        let tools = active.manager.tools();
        let instructions = active.manager.instructions();
        let target_model = agent.preferred_model().unwrap_or(active.user_model());
        active
            .session
            .configure_for_agent(tools.clone(), instructions.clone(), entering_gate);

        if target_model != active.session.model() {
            match active.session.switch_model_live(target_model).await {
                Ok(()) => return MODEL_SWITCHED_SENTINEL.to_string(),
                Err(e) => {
                    // Stay on the old model rather than dropping the
                    // call; the session is still connected.
                    error!("model switch during agent switch failed: {}", e);
                }
            }
        }

        active
            .session
            .update_session(Some(tools), Some(instructions), Some(entering_gate))
            .await;
        format!("Du bist jetzt mit {} verbunden.", agent.display_name())
    }

    async fn handle_command(self: &Arc<Self>, command: DashboardCommand) {
        let current = self.current.lock().await.clone();
        match command {
            DashboardCommand::AcceptCall => {
                if let Some(call) = self.engine.current_call() {
                    if let Err(e) = self.engine.accept(&call).await {
                        debug!("dashboard accept ignored: {}", e);
                    }
                }
            }
            DashboardCommand::Hangup => {
                if let Some(active) = current {
                    active.set_end_reason("dashboard_hangup");
                    let _ = self.engine.hangup(&active.handle).await;
                }
            }
            DashboardCommand::MuteAi => {
                if let Some(active) = current {
                    active.session.set_muted(true);
                }
            }
            DashboardCommand::UnmuteAi => {
                if let Some(active) = current {
                    active.session.set_muted(false);
                }
            }
            DashboardCommand::SwitchAgent { agent_name } => {
                let Some(active) = current else {
                    return;
                };
                let from = active.manager.active_agent_name();
                if active.manager.switch_agent(&agent_name).await {
                    active
                        .session
                        .update_session(
                            Some(active.manager.tools()),
                            Some(active.manager.instructions()),
                            None,
                        )
                        .await;
                    emit(
                        &self.updates,
                        DashboardMessage::AgentChanged {
                            from,
                            to: agent_name,
                        },
                    );
                }
            }
        }
    }
}

/// Session observer for one call: relays AI events into the
/// orchestrator with a weak back-reference so a finished call cannot
/// be revived by a late event.
struct CallObserver {
    inner: Arc<Inner>,
    call: OnceLock<Weak<ActiveCall>>,
}

impl CallObserver {
    fn active(&self) -> Option<Arc<ActiveCall>> {
        self.call.get().and_then(Weak::upgrade)
    }
}

#[async_trait]
impl SessionObserver for CallObserver {
    async fn on_audio(&self, pcm24: Vec<u8>) {
        if let Some(active) = self.active() {
            self.inner
                .engine
                .send_audio(&active.handle, &ai_output_to_sip(&pcm24));
        }
    }

    async fn on_transcript(&self, role: TranscriptRole, text: String, is_final: bool) {
        let Some(active) = self.active() else {
            return;
        };
        emit(
            &self.inner.updates,
            DashboardMessage::Transcript {
                role: role.as_str().to_string(),
                text: text.clone(),
                is_final,
            },
        );
        if !is_final {
            return;
        }
        active.add_transcript(role, &text);
        active.router.add_transcript(role.as_str(), &text);

        // The caller spoke while gated: reset the silence budget.
        if role == TranscriptRole::Caller && !active.manager.is_unlocked() {
            self.inner.restart_inactivity(&active);
        }
    }

    async fn on_interruption(&self) {
        let Some(active) = self.active() else {
            return;
        };
        let dropped = self.inner.engine.clear_audio_queue(&active.handle);
        if dropped > 0 {
            debug!("barge-in: dropped {} queued frames", dropped);
        }
    }

    async fn on_ai_state(&self, state: AiState) {
        emit(
            &self.inner.updates,
            DashboardMessage::AiState {
                state: state.as_str().to_string(),
            },
        );
    }

    async fn on_usage(&self, usage: UsageSnapshot) {
        let Some(active) = self.active() else {
            return;
        };
        // Price the delta with the model that is live *now*; snapshots
        // around a switch keep deltas on the right side of it.
        let model = active.session.model();
        let (delta, total) = active.apply_usage(usage, model);
        if delta > 0.0 {
            debug!("usage delta {:.4} ct (total {:.2} ct)", delta, total);
        }
        emit(
            &self.inner.updates,
            DashboardMessage::CallCost {
                cost_cents: total,
                usage,
            },
        );
    }

    async fn on_model_changed(&self, model: ModelKey) {
        emit(
            &self.inner.updates,
            DashboardMessage::ModelChanged {
                model: model.short_name().to_string(),
            },
        );
    }

    async fn on_function_call(&self, _call_id: String, name: String, args: Value) -> String {
        let Some(active) = self.active() else {
            return "Fehler: Kein aktiver Anruf.".to_string();
        };
        self.inner.handle_tool_call(&active, name, args).await
    }

    async fn on_session_closed(&self, reason: String) {
        let Some(active) = self.active() else {
            return;
        };
        warn!("AI session closed ({}), ending call", reason);
        active.set_end_reason(&reason);
        let _ = self.inner.engine.hangup(&active.handle).await;
    }
}
