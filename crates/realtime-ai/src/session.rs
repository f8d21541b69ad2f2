//! The realtime session: connection management, event demux, response
//! lifecycle and live model switching.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::{RealtimeError, Result};
use crate::model::ModelKey;
use crate::observer::{AiState, SessionObserver, TranscriptRole, UsageSnapshot};
use crate::protocol::{
    audio_append, function_output, response_create, session_patch, session_update, ServerEvent,
};
use crate::{BEEP_QUIET_PREFIX, MODEL_SWITCHED_SENTINEL};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// How long a tool result waits for an in-flight response to finish
/// before forcing its own `response.create`.
const RESPONSE_WAIT: Duration = Duration::from_millis(100);
const RESPONSE_WAIT_ROUNDS: u32 = 10;

/// Pause between a model switch and the greeting on the new session.
const POST_SWITCH_GREETING_DELAY: Duration = Duration::from_millis(300);

/// Connection parameters for the realtime endpoint.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Provider API key (bearer auth).
    pub api_key: String,
    /// URL prefix; the model id is appended.
    pub base_url: String,
    /// TTS voice for speech responses.
    pub voice: String,
}

impl SessionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        SessionConfig {
            api_key: api_key.into(),
            base_url: "wss://api.openai.com/v1/realtime?model=".into(),
            voice: "alloy".into(),
        }
    }
}

/// One realtime AI session, created per call.
pub struct RealtimeSession {
    shared: Arc<SessionShared>,
}

struct SessionState {
    model: ModelKey,
    tools: Vec<Value>,
    instructions: String,
    text_only: bool,
    response_in_progress: bool,
    unmute_after_response: bool,
    current_response_has_audio: bool,
    ai_state: AiState,
    usage: UsageSnapshot,
    receive_task: Option<JoinHandle<()>>,
}

struct SessionShared {
    config: SessionConfig,
    observer: Arc<dyn SessionObserver>,
    state: Mutex<SessionState>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    running: AtomicBool,
    muted: AtomicBool,
    /// Receive-loop generation. Bumped on every (re)connect and on
    /// disconnect so a superseded loop cannot flip `running` or report
    /// a close for a session that was deliberately replaced.
    generation: AtomicU64,
}

impl RealtimeSession {
    pub fn new(config: SessionConfig, observer: Arc<dyn SessionObserver>) -> Self {
        RealtimeSession {
            shared: Arc::new(SessionShared {
                config,
                observer,
                state: Mutex::new(SessionState {
                    model: ModelKey::default(),
                    tools: Vec::new(),
                    instructions: String::new(),
                    text_only: false,
                    response_in_progress: false,
                    unmute_after_response: false,
                    current_response_has_audio: false,
                    ai_state: AiState::Idle,
                    usage: UsageSnapshot::default(),
                    receive_task: None,
                }),
                sink: tokio::sync::Mutex::new(None),
                running: AtomicBool::new(false),
                muted: AtomicBool::new(false),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Install the active agent's tools and instructions before
    /// connecting (or reconnecting).
    pub fn configure_for_agent(&self, tools: Vec<Value>, instructions: String, text_only: bool) {
        let mut state = self.shared.state.lock();
        info!(
            "session configured: {} tools, {} chars instructions, text_only={}",
            tools.len(),
            instructions.len(),
            text_only
        );
        state.tools = tools;
        state.instructions = instructions;
        state.text_only = text_only;
    }

    /// Set the model used on the next connect.
    pub fn set_model(&self, model: ModelKey) {
        self.shared.state.lock().model = model;
    }

    pub fn model(&self) -> ModelKey {
        self.shared.state.lock().model
    }

    pub fn is_connected(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn usage(&self) -> UsageSnapshot {
        self.shared.state.lock().usage
    }

    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::SeqCst)
    }

    /// Mute until the current response finishes (the beep path).
    pub fn mute_until_response_done(&self) {
        self.shared.muted.store(true, Ordering::SeqCst);
        self.shared.state.lock().unmute_after_response = true;
    }

    /// Connect and configure the session for the current model.
    pub async fn connect(&self) -> Result<()> {
        self.shared.connect().await
    }

    /// Disconnect, leaving cumulative usage untouched.
    pub async fn disconnect(&self) {
        self.shared.disconnect().await;
    }

    /// Push one chunk of caller audio (PCM16 @ 16 kHz).
    pub async fn send_audio(&self, pcm16: &[u8]) {
        if !self.is_connected() {
            return;
        }
        let encoded = base64::engine::general_purpose::STANDARD.encode(pcm16);
        self.shared.send_json(&audio_append(&encoded)).await;
    }

    /// Ask the model to open the conversation. No-op (with a log) when
    /// a response is already in progress.
    pub async fn trigger_greeting(&self) {
        self.shared.trigger_greeting().await;
    }

    /// Update tools/instructions/modality of the live session.
    pub async fn update_session(
        &self,
        tools: Option<Vec<Value>>,
        instructions: Option<String>,
        text_only: Option<bool>,
    ) {
        let patch = {
            let mut state = self.shared.state.lock();
            if let Some(tools) = &tools {
                state.tools = tools.clone();
            }
            if let Some(instructions) = &instructions {
                state.instructions = instructions.clone();
            }
            if let Some(text_only) = text_only {
                state.text_only = text_only;
            }
            session_patch(
                instructions.as_deref(),
                tools.as_deref(),
                text_only,
            )
        };
        self.shared.send_json(&patch).await;
        info!("session updated (text_only={:?})", text_only);
    }

    /// Switch the model in place, preserving cumulative usage.
    ///
    /// Same target is a no-op. The caller is expected to trigger a
    /// greeting afterwards via the `__MODEL_SWITCHED__` sentinel path.
    pub async fn switch_model_live(&self, model: ModelKey) -> Result<()> {
        let (current, saved_usage) = {
            let state = self.shared.state.lock();
            (state.model, state.usage)
        };
        if current == model {
            info!("model {} already active", model);
            return Ok(());
        }

        info!("live model switch: {} -> {}", current, model);
        self.shared.state.lock().model = model;

        // Disconnect drops the socket but keeps counters; connect
        // resets them, so restore the snapshot on both sides.
        self.shared.disconnect().await;
        self.shared.state.lock().usage = saved_usage;
        self.shared.connect().await?;
        self.shared.state.lock().usage = saved_usage;

        self.shared.observer.on_model_changed(model).await;
        info!("live model switch complete: {}", model);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }
}

impl SessionShared {
    async fn connect(self: &Arc<Self>) -> Result<()> {
        let (model, instructions, tools, text_only) = {
            let state = self.state.lock();
            (
                state.model,
                state.instructions.clone(),
                state.tools.clone(),
                state.text_only,
            )
        };

        let url = format!("{}{}", self.config.base_url, model.model_id());
        info!("connecting realtime session with model {}", model.model_id());

        let uri: http::Uri = url
            .parse()
            .map_err(|e| RealtimeError::WebSocket(format!("bad url: {}", e)))?;
        let host = uri
            .host()
            .ok_or_else(|| RealtimeError::WebSocket("url without host".into()))?
            .to_string();
        let request = http::Request::builder()
            .uri(uri)
            .header("Host", host)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("OpenAI-Beta", "realtime=v1")
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .body(())
            .map_err(|e| RealtimeError::WebSocket(e.to_string()))?;

        let (ws, _) = connect_async(request).await?;
        let (sink, source) = ws.split();
        *self.sink.lock().await = Some(sink);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.running.store(true, Ordering::SeqCst);

        self.send_json(&session_update(
            &instructions,
            &tools,
            &self.config.voice,
            text_only,
        ))
        .await;
        debug!("session configured with {} tools", tools.len());

        // Fresh connection, fresh counters; a model switch restores
        // its snapshot right after this returns.
        {
            let mut state = self.state.lock();
            state.usage = UsageSnapshot::default();
            state.response_in_progress = false;
            state.current_response_has_audio = false;
        }

        let loop_self = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop_self.receive_loop(source, generation).await;
        });
        self.state.lock().receive_task = Some(task);

        self.set_ai_state(AiState::Listening).await;
        info!("realtime session connected");
        Ok(())
    }

    async fn disconnect(self: &Arc<Self>) {
        // Invalidate the current loop generation first: whatever the
        // old loop does on exit, it no longer owns the session.
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);

        if let Some(task) = self.state.lock().receive_task.take() {
            task.abort();
        }

        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }

        {
            let mut state = self.state.lock();
            state.response_in_progress = false;
            state.unmute_after_response = false;
            state.current_response_has_audio = false;
        }
        self.set_ai_state(AiState::Idle).await;
        info!("realtime session disconnected");
    }

    async fn receive_loop(self: Arc<Self>, mut source: WsSource, generation: u64) {
        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => self.handle_event(event).await,
                    Err(e) => warn!("unparseable server event: {}", e),
                },
                Ok(Message::Close(frame)) => {
                    debug!("server closed the socket: {:?}", frame);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("websocket receive error: {}", e);
                    break;
                }
            }
        }

        // Only the loop that still owns the session may flip state; a
        // model switch has already started a newer loop.
        if self.generation.load(Ordering::SeqCst) == generation {
            let was_running = self.running.swap(false, Ordering::SeqCst);
            if was_running {
                warn!("realtime socket closed unexpectedly");
                self.observer.on_session_closed("ai_disconnect".into()).await;
                self.set_ai_state(AiState::Idle).await;
            }
        } else {
            debug!("stale receive loop (gen {}) exiting quietly", generation);
        }
    }

    async fn handle_event(self: &Arc<Self>, event: ServerEvent) {
        match event {
            ServerEvent::ResponseCreated => {
                let mut state = self.state.lock();
                state.response_in_progress = true;
                state.current_response_has_audio = false;
            }

            ServerEvent::ResponseDone { response } => {
                let snapshot = {
                    let mut state = self.state.lock();
                    state.response_in_progress = false;
                    if state.unmute_after_response {
                        state.unmute_after_response = false;
                        self.muted.store(false, Ordering::SeqCst);
                        debug!("auto-unmute after response");
                    }
                    match response.usage {
                        Some(usage) => {
                            usage.add_to(&mut state.usage);
                            Some(state.usage)
                        }
                        None => None,
                    }
                };
                if let Some(snapshot) = snapshot {
                    self.observer.on_usage(snapshot).await;
                }
                self.set_ai_state(AiState::Listening).await;
            }

            ServerEvent::AudioDelta { delta } => {
                if delta.is_empty() || self.muted.load(Ordering::SeqCst) {
                    return;
                }
                let pcm24 = match base64::engine::general_purpose::STANDARD.decode(&delta) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("undecodable audio delta: {}", e);
                        return;
                    }
                };
                let first = {
                    let mut state = self.state.lock();
                    !std::mem::replace(&mut state.current_response_has_audio, true)
                };
                if first {
                    debug!("first audio chunk of response ({} bytes)", pcm24.len());
                    self.set_ai_state(AiState::Speaking).await;
                }
                self.observer.on_audio(pcm24).await;
            }

            ServerEvent::SpeechStarted => {
                info!("caller speech detected, interrupting");
                {
                    let mut state = self.state.lock();
                    // Barge-in ends the running response.
                    state.response_in_progress = false;
                    if state.unmute_after_response {
                        state.unmute_after_response = false;
                        self.muted.store(false, Ordering::SeqCst);
                    }
                }
                self.set_ai_state(AiState::UserSpeaking).await;
                self.observer.on_interruption().await;
            }

            ServerEvent::SpeechStopped => {
                self.set_ai_state(AiState::Thinking).await;
            }

            ServerEvent::InputTranscriptionCompleted { transcript } => {
                if !transcript.is_empty() {
                    self.observer
                        .on_transcript(TranscriptRole::Caller, transcript, true)
                        .await;
                }
            }

            ServerEvent::AssistantTranscriptDelta { delta } => {
                if !delta.is_empty() {
                    self.observer
                        .on_transcript(TranscriptRole::Assistant, delta, false)
                        .await;
                }
            }

            ServerEvent::AssistantTranscriptDone { transcript } => {
                if !transcript.is_empty() {
                    self.observer
                        .on_transcript(TranscriptRole::Assistant, transcript, true)
                        .await;
                }
            }

            ServerEvent::Error { error } => {
                let text = error.to_string();
                if text.contains("already has an active response") {
                    // Harmless ordering race; the pending response will
                    // complete on its own.
                    warn!("provider: response still active, waiting it out");
                } else {
                    error!("provider error: {}", text);
                    self.state.lock().response_in_progress = false;
                }
            }

            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                info!("function call: {}({})", name, arguments);
                // Tools may run for a while; never block the receive
                // loop on them.
                let dispatch_self = Arc::clone(self);
                tokio::spawn(async move {
                    dispatch_self
                        .dispatch_function_call(call_id, name, arguments)
                        .await;
                });
            }

            ServerEvent::Unknown => {}
        }
    }

    async fn dispatch_function_call(self: &Arc<Self>, call_id: String, name: String, raw_args: String) {
        // Fail-soft argument parsing; the tool decides what missing
        // arguments mean.
        let args: Value =
            serde_json::from_str(&raw_args).unwrap_or_else(|_| Value::Object(Default::default()));

        let result = self
            .observer
            .on_function_call(call_id.clone(), name.clone(), args)
            .await;

        if result == MODEL_SWITCHED_SENTINEL {
            // The session was replaced under this call_id; answering it
            // would hit the dead socket. Greet on the new session.
            info!("model switched mid-call; skipping function result");
            self.state.lock().response_in_progress = false;
            tokio::time::sleep(POST_SWITCH_GREETING_DELAY).await;
            self.trigger_greeting().await;
            return;
        }

        if let Some(quiet) = result.strip_prefix(BEEP_QUIET_PREFIX) {
            self.send_function_output_only(&call_id, quiet).await;
            return;
        }

        self.send_function_result(&call_id, &result).await;
    }

    /// Deliver a function output, then request the follow-up response.
    async fn send_function_result(self: &Arc<Self>, call_id: &str, result: &str) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.send_json(&function_output(call_id, result)).await;

        if self.state.lock().response_in_progress {
            debug!("response still active, waiting before response.create");
            for _ in 0..RESPONSE_WAIT_ROUNDS {
                tokio::time::sleep(RESPONSE_WAIT).await;
                if !self.state.lock().response_in_progress {
                    break;
                }
            }
        }

        self.state.lock().response_in_progress = true;
        self.send_json(&response_create()).await;
        self.set_ai_state(AiState::Thinking).await;
        debug!("function result sent for call_id={}", call_id);
    }

    /// Deliver a function output without requesting a response; the
    /// session drops back to listening until VAD fires again.
    async fn send_function_output_only(self: &Arc<Self>, call_id: &str, result: &str) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.send_json(&function_output(call_id, result)).await;
        self.state.lock().response_in_progress = false;
        self.set_ai_state(AiState::Listening).await;
        debug!("quiet function output sent for call_id={}", call_id);
    }

    async fn trigger_greeting(self: &Arc<Self>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock();
            if state.response_in_progress {
                warn!("response already active, skipping greeting");
                return;
            }
            state.response_in_progress = true;
        }
        self.send_json(&response_create()).await;
        info!("greeting triggered");
    }

    async fn send_json(&self, payload: &Value) {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            debug!("dropping outbound event, no socket");
            return;
        };
        let text = payload.to_string();
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            if self.running.load(Ordering::SeqCst) {
                warn!("websocket send failed: {}", e);
            }
        }
    }

    async fn set_ai_state(&self, new_state: AiState) {
        let changed = {
            let mut state = self.state.lock();
            if state.ai_state == new_state {
                false
            } else {
                state.ai_state = new_state;
                true
            }
        };
        if changed {
            self.observer.on_ai_state(new_state).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ResponseData, ResponseUsage, TokenDetails};
    use async_trait::async_trait;
    use base64::Engine as _;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        tool_result: Mutex<String>,
    }

    impl Recorder {
        fn record(&self, entry: impl Into<String>) {
            self.calls.lock().push(entry.into());
        }
        fn entries(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl SessionObserver for Recorder {
        async fn on_audio(&self, pcm24: Vec<u8>) {
            self.record(format!("audio:{}", pcm24.len()));
        }
        async fn on_interruption(&self) {
            self.record("interruption");
        }
        async fn on_ai_state(&self, state: AiState) {
            self.record(format!("state:{}", state.as_str()));
        }
        async fn on_usage(&self, usage: UsageSnapshot) {
            self.record(format!("usage:{}", usage.input_audio_tokens));
        }
        async fn on_function_call(&self, _id: String, name: String, _args: Value) -> String {
            self.record(format!("fc:{}", name));
            self.tool_result.lock().clone()
        }
    }

    fn session_with(observer: Arc<Recorder>) -> RealtimeSession {
        RealtimeSession::new(SessionConfig::new("test-key"), observer)
    }

    fn done_with_usage(input_audio: u64) -> ServerEvent {
        ServerEvent::ResponseDone {
            response: ResponseData {
                usage: Some(ResponseUsage {
                    input_token_details: TokenDetails {
                        text_tokens: 1,
                        audio_tokens: input_audio,
                    },
                    output_token_details: TokenDetails {
                        text_tokens: 2,
                        audio_tokens: 3,
                    },
                }),
            },
        }
    }

    #[tokio::test]
    async fn response_lifecycle_tracks_in_progress() {
        let observer = Arc::new(Recorder::default());
        let session = session_with(Arc::clone(&observer));
        let shared = session.shared();

        shared.handle_event(ServerEvent::ResponseCreated).await;
        assert!(shared.state.lock().response_in_progress);

        shared.handle_event(done_with_usage(20)).await;
        assert!(!shared.state.lock().response_in_progress);
        assert_eq!(session.usage().input_audio_tokens, 20);
        assert!(observer.entries().contains(&"usage:20".to_string()));
        assert!(observer.entries().contains(&"state:listening".to_string()));
    }

    #[tokio::test]
    async fn usage_accumulates_across_responses_and_survives_disconnect() {
        let observer = Arc::new(Recorder::default());
        let session = session_with(observer);
        let shared = session.shared();

        shared.handle_event(done_with_usage(10)).await;
        shared.handle_event(done_with_usage(15)).await;
        assert_eq!(session.usage().input_audio_tokens, 25);
        assert_eq!(session.usage().output_audio_tokens, 6);

        // Disconnect must not reset the counters (only connect does;
        // the model switch restores its snapshot around it).
        shared.disconnect().await;
        assert_eq!(session.usage().input_audio_tokens, 25);
    }

    #[tokio::test]
    async fn barge_in_clears_response_and_unmutes() {
        let observer = Arc::new(Recorder::default());
        let session = session_with(Arc::clone(&observer));
        let shared = session.shared();

        shared.handle_event(ServerEvent::ResponseCreated).await;
        session.mute_until_response_done();
        assert!(session.is_muted());

        shared.handle_event(ServerEvent::SpeechStarted).await;
        assert!(!shared.state.lock().response_in_progress);
        assert!(!session.is_muted());
        assert!(observer.entries().contains(&"interruption".to_string()));
        assert!(observer.entries().contains(&"state:user_speaking".to_string()));
    }

    #[tokio::test]
    async fn muted_audio_is_dropped() {
        let observer = Arc::new(Recorder::default());
        let session = session_with(Arc::clone(&observer));
        let shared = session.shared();

        session.set_muted(true);
        let delta = base64::engine::general_purpose::STANDARD.encode([0u8; 480]);
        shared.handle_event(ServerEvent::AudioDelta { delta }).await;
        assert!(observer.entries().iter().all(|e| !e.starts_with("audio:")));

        session.set_muted(false);
        let delta = base64::engine::general_purpose::STANDARD.encode([0u8; 480]);
        shared.handle_event(ServerEvent::AudioDelta { delta }).await;
        assert!(observer.entries().contains(&"audio:480".to_string()));
        assert!(observer.entries().contains(&"state:speaking".to_string()));
    }

    #[tokio::test]
    async fn greeting_is_noop_while_response_in_progress() {
        let observer = Arc::new(Recorder::default());
        let session = session_with(observer);
        let shared = session.shared();
        shared.running.store(true, Ordering::SeqCst);

        shared.handle_event(ServerEvent::ResponseCreated).await;
        shared.trigger_greeting().await;
        // Still marked in progress by the original response, and no
        // state excursion to thinking happened.
        assert!(shared.state.lock().response_in_progress);
    }

    #[tokio::test]
    async fn quiet_tool_results_do_not_trigger_a_response() {
        let observer = Arc::new(Recorder::default());
        *observer.tool_result.lock() = format!("{}ok", BEEP_QUIET_PREFIX);
        let session = session_with(Arc::clone(&observer));
        let shared = session.shared();
        shared.running.store(true, Ordering::SeqCst);

        shared
            .dispatch_function_call("call_9".into(), "unlock".into(), "{}".into())
            .await;

        assert!(observer.entries().contains(&"fc:unlock".to_string()));
        assert!(!shared.state.lock().response_in_progress);
        assert!(observer.entries().contains(&"state:listening".to_string()));
    }

    #[tokio::test]
    async fn provider_active_response_error_is_tolerated() {
        let observer = Arc::new(Recorder::default());
        let session = session_with(observer);
        let shared = session.shared();

        shared.handle_event(ServerEvent::ResponseCreated).await;
        shared
            .handle_event(ServerEvent::Error {
                error: serde_json::json!({
                    "message": "Conversation already has an active response"
                }),
            })
            .await;
        // The benign error leaves the in-flight response alone.
        assert!(shared.state.lock().response_in_progress);

        shared
            .handle_event(ServerEvent::Error {
                error: serde_json::json!({"message": "boom"}),
            })
            .await;
        assert!(!shared.state.lock().response_in_progress);
    }

    #[tokio::test]
    async fn malformed_tool_arguments_fall_back_to_empty_object() {
        let observer = Arc::new(Recorder::default());
        *observer.tool_result.lock() = "done".into();
        let session = session_with(Arc::clone(&observer));
        let shared = session.shared();

        shared
            .dispatch_function_call("c1".into(), "unlock".into(), "{not json".into())
            .await;
        assert!(observer.entries().contains(&"fc:unlock".to_string()));
    }
}
