//! End-to-end gateway scenarios against a fake trunk (UDP) and a fake
//! realtime AI endpoint (local WebSocket server).
//!
//! Covers the security-gate flows: wrong codes with strikes and
//! auto-blacklist, the correct-code unlock with the modality switch,
//! and the inactivity timeout.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use voxgate_agents::{Agent, AgentError, AgentRegistry, ToolResult};
use voxgate_gateway::dashboard::DashboardMessage;
use voxgate_gateway::orchestrator::{default_registry, Orchestrator};
use voxgate_gateway::store::{open_database, BlacklistStore, CallLogStore};
use voxgate_gateway::{GatewayConfig, TrunkFirewall};
use voxgate_realtime_ai::ModelKey;
use voxgate_sip_core::{SipMessage, SipMethod, SipRequest, SipResponse};
use voxgate_sip_engine::{SipEngine, SipEngineConfig};

const WAIT: Duration = Duration::from_secs(5);
const ACCESS_CODE: &str = "7234";
const CALLER: &str = "sip:+4915551234@127.0.0.1";

// ===== Fake trunk =====

struct FakeTrunk {
    socket: UdpSocket,
    engine_addr: Option<SocketAddr>,
    buf: Vec<u8>,
    invite_seq: u32,
}

impl FakeTrunk {
    async fn bind() -> Self {
        FakeTrunk {
            socket: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
            engine_addr: None,
            buf: vec![0u8; 65535],
            invite_seq: 0,
        }
    }

    fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    async fn recv(&mut self) -> SipMessage {
        let (len, from) = timeout(WAIT, self.socket.recv_from(&mut self.buf))
            .await
            .expect("trunk recv timed out")
            .unwrap();
        self.engine_addr = Some(from);
        SipMessage::parse(&self.buf[..len]).unwrap()
    }

    async fn send(&self, bytes: &[u8]) {
        self.socket
            .send_to(bytes, self.engine_addr.unwrap())
            .await
            .unwrap();
    }

    async fn answer_register(&mut self) {
        loop {
            if let SipMessage::Request(req) = self.recv().await {
                if req.method == SipMethod::Register {
                    self.send(&SipResponse::for_request(&req, 200, "OK").to_bytes())
                        .await;
                    return;
                }
            }
        }
    }

    /// Ring the gateway and return the final response status.
    async fn place_call(&mut self, caller: &str) -> u16 {
        self.invite_seq += 1;
        let call_id = format!("gwtest-{}@trunk", self.invite_seq);
        let body = "v=0\r\n\
             o=- 1 1 IN IP4 127.0.0.1\r\n\
             s=test\r\n\
             c=IN IP4 127.0.0.1\r\n\
             t=0 0\r\n\
             m=audio 39000 RTP/AVP 8\r\n\
             a=rtpmap:8 PCMA/8000\r\n";
        let mut req = SipRequest::new(SipMethod::Invite, "sip:gw@127.0.0.1");
        req.headers.push(
            "Via",
            format!("SIP/2.0/UDP 127.0.0.1:{};branch=z9hG4bKinv{}", self.port(), self.invite_seq),
        );
        req.headers
            .push("From", format!("<{}>;tag=remote{}", caller, self.invite_seq));
        req.headers.push("To", "<sip:gw@127.0.0.1>");
        req.headers.push("Call-ID", &call_id);
        req.headers.push("CSeq", "1 INVITE");
        req.headers
            .push("Contact", format!("<sip:caller@127.0.0.1:{}>", self.port()));
        let req = req.with_body("application/sdp", body.as_bytes().to_vec());
        self.send(&req.to_bytes()).await;

        loop {
            if let SipMessage::Response(resp) = self.recv().await {
                if resp.status >= 200 {
                    return resp.status;
                }
            }
        }
    }

    /// Wait for the gateway's BYE and confirm it.
    async fn expect_bye(&mut self) {
        loop {
            if let SipMessage::Request(req) = self.recv().await {
                if req.method == SipMethod::Bye {
                    self.send(&SipResponse::for_request(&req, 200, "OK").to_bytes())
                        .await;
                    return;
                }
            }
        }
    }
}

// ===== Fake realtime AI endpoint =====

struct AiConnection {
    /// Events the gateway sent us.
    from_gateway: mpsc::UnboundedReceiver<Value>,
    /// Events we push to the gateway.
    to_gateway: mpsc::UnboundedSender<String>,
}

impl AiConnection {
    async fn next_event(&mut self) -> Value {
        timeout(WAIT, self.from_gateway.recv())
            .await
            .expect("AI event timed out")
            .expect("AI connection closed")
    }

    /// Wait for the next event of the given type, skipping others.
    async fn next_of_type(&mut self, wanted: &str) -> Value {
        loop {
            let event = self.next_event().await;
            if event["type"] == wanted {
                return event;
            }
        }
    }

    fn send(&self, event: Value) {
        let _ = self.to_gateway.send(event.to_string());
    }

    fn send_tool_call(&self, call_id: &str, name: &str, args: Value) {
        self.send(json!({
            "type": "response.function_call_arguments.done",
            "call_id": call_id,
            "name": name,
            "arguments": args.to_string(),
        }));
    }
}

struct FakeAi {
    connections: mpsc::UnboundedReceiver<AiConnection>,
    port: u16,
}

impl FakeAi {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (conn_tx, connections) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                tokio::spawn(async move {
                    let ws = match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(_) => return,
                    };
                    let (mut sink, mut source) = ws.split();
                    let (in_tx, in_rx) = mpsc::unbounded_channel();
                    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
                    let _ = conn_tx.send(AiConnection {
                        from_gateway: in_rx,
                        to_gateway: out_tx,
                    });
                    loop {
                        tokio::select! {
                            msg = source.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Ok(value) = serde_json::from_str(&text) {
                                        let _ = in_tx.send(value);
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(_)) => break,
                            },
                            out = out_rx.recv() => match out {
                                Some(text) => {
                                    if sink.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                });
            }
        });

        FakeAi { connections, port }
    }

    async fn next_connection(&mut self) -> AiConnection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("AI connection timed out")
            .expect("AI listener gone")
    }
}

// ===== Harness =====

struct Harness {
    trunk: FakeTrunk,
    ai: FakeAi,
    updates: broadcast::Receiver<DashboardMessage>,
    blacklist: BlacklistStore,
    /// Kept alive so the orchestrator's command channel stays open.
    _commands: mpsc::Sender<voxgate_gateway::dashboard::DashboardCommand>,
}

/// A specialist that insists on the premium model, for the
/// forced-model switch scenario.
struct PremiumCoder;

#[async_trait::async_trait]
impl Agent for PremiumCoder {
    fn name(&self) -> &str {
        "code_agent"
    }
    fn display_name(&self) -> &str {
        "Code-Agent"
    }
    fn description(&self) -> &str {
        "Programmiert Projekte auf Zuruf."
    }
    fn tools(&self) -> Vec<Value> {
        vec![voxgate_agents::function_tool(
            "status",
            "Zeigt den Task-Status.",
            json!({"type": "object", "properties": {}, "required": []}),
        )]
    }
    fn instructions(&self) -> String {
        "Du bist der Code-Agent.".into()
    }
    fn preferred_model(&self) -> Option<ModelKey> {
        Some(ModelKey::Premium)
    }
    async fn execute_tool(&self, name: &str, _args: &Value) -> Result<ToolResult, AgentError> {
        match name {
            "status" => Ok(ToolResult::text("Keine laufenden Tasks.")),
            other => Err(AgentError::UnknownTool(other.into())),
        }
    }
}

async fn start_gateway(inactivity: Duration) -> Harness {
    start_gateway_with(inactivity, default_registry(ACCESS_CODE)).await
}

async fn start_gateway_with(inactivity: Duration, registry: Arc<AgentRegistry>) -> Harness {
    let trunk = FakeTrunk::bind().await;
    let ai = FakeAi::start().await;

    let pool = open_database(":memory:").await.unwrap();
    let blacklist = BlacklistStore::new(pool.clone());
    let call_log = CallLogStore::new(pool);

    let config = GatewayConfig {
        api_key: "test-key".into(),
        sip_user: "gw".into(),
        sip_password: "secret".into(),
        sip_server: "127.0.0.1".into(),
        sip_port: trunk.port(),
        public_ip: None,
        database_path: ":memory:".into(),
        access_code: ACCESS_CODE.into(),
        api_host: "127.0.0.1".into(),
        api_port: 0,
        firewall_enabled: true,
        realtime_base_url: format!("ws://127.0.0.1:{}/v1/realtime?model=", ai.port),
        inactivity_timeout: inactivity,
    };

    let mut engine_config = SipEngineConfig::new("127.0.0.1", "gw", "secret")
        .with_local_port(0)
        .with_rtp_ports(27000, 27998);
    engine_config.server_port = trunk.port();
    let (engine, events) = SipEngine::start(engine_config).await.unwrap();

    let firewall = Arc::new(TrunkFirewall::new(
        true,
        config.identity_uri(),
        config.sip_server.clone(),
    ));

    let (updates_tx, updates) = broadcast::channel(512);
    let (commands_tx, commands_rx) = mpsc::channel(8);

    let orchestrator = Orchestrator::new(
        config,
        engine,
        registry,
        blacklist.clone(),
        call_log,
        firewall,
        updates_tx,
    );
    tokio::spawn(async move {
        orchestrator.run(events, commands_rx).await;
    });

    Harness {
        trunk,
        ai,
        updates,
        blacklist,
        _commands: commands_tx,
    }
}

async fn next_update(rx: &mut broadcast::Receiver<DashboardMessage>) -> DashboardMessage {
    timeout(WAIT, rx.recv())
        .await
        .expect("dashboard update timed out")
        .expect("dashboard channel closed")
}

async fn wait_for_call_ended(rx: &mut broadcast::Receiver<DashboardMessage>) -> String {
    loop {
        if let DashboardMessage::CallEnded { reason, .. } = next_update(rx).await {
            return reason;
        }
    }
}

// ===== Scenarios =====

#[tokio::test]
async fn three_wrong_codes_strike_out_and_auto_blacklist() {
    let mut h = start_gateway(Duration::from_secs(30)).await;
    h.trunk.answer_register().await;

    // Three failed-unlock calls within the window...
    for round in 0..3 {
        assert_eq!(h.trunk.place_call(CALLER).await, 200, "call {}", round);
        let mut ai = h.ai.next_connection().await;

        // The gate runs text-only with exactly the unlock tool (plus
        // the globals).
        let setup = ai.next_of_type("session.update").await;
        assert_eq!(setup["session"]["modalities"], json!(["text"]));
        let tools = setup["session"]["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t["name"] == "unlock"));

        // Two wrong codes: each produces a function output and a new
        // response request.
        for attempt in 0..2 {
            ai.send_tool_call(&format!("c{}", attempt), "unlock", json!({"code": "1111"}));
            let output = ai.next_of_type("conversation.item.create").await;
            assert_eq!(output["item"]["output"], "Falscher Code.");
            ai.next_of_type("response.create").await;
        }

        // Third wrong code hangs up.
        ai.send_tool_call("c2", "unlock", json!({"code": "1111"}));
        h.trunk.expect_bye().await;
        let reason = wait_for_call_ended(&mut h.updates).await;
        assert_eq!(reason, "security_hangup");
    }

    // ...and the caller is now auto-blacklisted.
    assert!(h.blacklist.is_blacklisted(CALLER).await.unwrap());
    let entry = &h.blacklist.all().await.unwrap()[0];
    assert!(entry.reason.starts_with("Auto-Blacklist:"));

    // The next call is rejected with 403 before any AI session opens.
    assert_eq!(h.trunk.place_call(CALLER).await, 403);
    loop {
        match next_update(&mut h.updates).await {
            DashboardMessage::CallRejected { reason, .. } => {
                assert_eq!(reason, "blacklisted");
                break;
            }
            _ => continue,
        }
    }
}

#[tokio::test]
async fn correct_code_unlocks_and_enables_speech() {
    let mut h = start_gateway(Duration::from_secs(30)).await;
    h.trunk.answer_register().await;

    assert_eq!(h.trunk.place_call(CALLER).await, 200);
    let mut ai = h.ai.next_connection().await;

    let setup = ai.next_of_type("session.update").await;
    assert_eq!(setup["session"]["modalities"], json!(["text"]));

    // The model relays the spoken digits with spaces; the gate strips
    // them before comparing.
    ai.send_tool_call("c1", "unlock", json!({"code": "7 2 3 4"}));

    // Switching off the gate re-configures the live session for
    // speech and the hub's tools.
    let patch = ai.next_of_type("session.update").await;
    assert_eq!(patch["session"]["modalities"], json!(["text", "audio"]));
    let tools = patch["session"]["tools"].as_array().unwrap();
    assert!(tools.iter().any(|t| t["name"] == "wechsel_zu_agent"));
    assert!(tools.iter().any(|t| t["name"] == "auflegen"));

    // The function output is the human sentence, not a sentinel.
    let output = ai.next_of_type("conversation.item.create").await;
    let text = output["item"]["output"].as_str().unwrap();
    assert!(text.contains("Zentrale"), "unexpected output: {}", text);
    assert!(!text.contains("__SWITCH__"));
    ai.next_of_type("response.create").await;

    // Dashboard observers saw the agent change.
    loop {
        match next_update(&mut h.updates).await {
            DashboardMessage::AgentChanged { from, to } => {
                assert_eq!(from.as_deref(), Some("security_agent"));
                assert_eq!(to, "main_agent");
                break;
            }
            _ => continue,
        }
    }

    // No strikes were recorded for the successful unlock.
    assert!(!h.blacklist.is_blacklisted(CALLER).await.unwrap());
}

#[tokio::test]
async fn silent_caller_hits_the_inactivity_timeout() {
    let mut h = start_gateway(Duration::from_millis(400)).await;
    h.trunk.answer_register().await;

    assert_eq!(h.trunk.place_call(CALLER).await, 200);
    let mut ai = h.ai.next_connection().await;
    let _ = ai.next_of_type("session.update").await;

    // Say nothing; the gate gives up and hangs up the call.
    h.trunk.expect_bye().await;
    let reason = wait_for_call_ended(&mut h.updates).await;
    assert_eq!(reason, "security_timeout");

    // The silent call counts as a failed attempt.
    assert!(!h.blacklist.is_blacklisted(CALLER).await.unwrap());
    h.blacklist.record_failed_call(CALLER).await.unwrap();
    h.blacklist.record_failed_call(CALLER).await.unwrap();
    assert!(h.blacklist.check_and_auto_blacklist(CALLER).await.unwrap());
}

#[tokio::test]
async fn forced_model_agent_switch_preserves_usage() {
    let registry = default_registry(ACCESS_CODE);
    registry.register(Arc::new(PremiumCoder));
    let mut h = start_gateway_with(Duration::from_secs(30), registry).await;
    h.trunk.answer_register().await;

    assert_eq!(h.trunk.place_call(CALLER).await, 200);
    let mut ai = h.ai.next_connection().await;
    let _ = ai.next_of_type("session.update").await;

    // Burn a million audio tokens on the mini model: 1000 ct.
    ai.send(json!({
        "type": "response.done",
        "response": {
            "usage": {
                "input_token_details": {"text_tokens": 0, "audio_tokens": 1_000_000},
                "output_token_details": {"text_tokens": 0, "audio_tokens": 0}
            }
        }
    }));
    loop {
        if let DashboardMessage::CallCost { cost_cents, .. } = next_update(&mut h.updates).await {
            assert!((cost_cents - 1000.0).abs() < 1.0, "cost {}", cost_cents);
            break;
        }
    }

    // Unlock, then ask the hub for the code agent. Its forced premium
    // model beats the caller's sticky mini choice and replaces the
    // session in flight.
    ai.send_tool_call("c1", "unlock", json!({"code": ACCESS_CODE}));
    ai.next_of_type("response.create").await;
    ai.send_tool_call("c2", "wechsel_zu_agent", json!({"agent_name": "code_agent"}));

    // The replacement connection is configured for the code agent...
    let mut ai2 = h.ai.next_connection().await;
    let setup = ai2.next_of_type("session.update").await;
    assert_eq!(setup["session"]["modalities"], json!(["text", "audio"]));
    let tools = setup["session"]["tools"].as_array().unwrap();
    assert!(tools.iter().any(|t| t["name"] == "status"));
    // ...and the forcing agent withholds the model-switch tool.
    assert!(tools.iter().all(|t| t["name"] != "model_wechseln"));

    // The stale call_id is never answered; instead the new session is
    // greeted after the switch settles.
    ai2.next_of_type("response.create").await;

    loop {
        if let DashboardMessage::ModelChanged { model } = next_update(&mut h.updates).await {
            assert_eq!(model, "premium");
            break;
        }
    }

    // Usage survived the switch: the next million audio tokens price
    // at the premium rate on top of the old total.
    ai2.send(json!({
        "type": "response.done",
        "response": {
            "usage": {
                "input_token_details": {"text_tokens": 0, "audio_tokens": 1_000_000},
                "output_token_details": {"text_tokens": 0, "audio_tokens": 0}
            }
        }
    }));
    loop {
        if let DashboardMessage::CallCost { cost_cents, usage } = next_update(&mut h.updates).await
        {
            // Counters only ever grow across the switch.
            assert_eq!(usage.input_audio_tokens, 2_000_000);
            assert!((cost_cents - 5000.0).abs() < 1.0, "cost {}", cost_cents);
            break;
        }
    }
}

#[tokio::test]
async fn firewall_rejects_foreign_callers() {
    let mut h = start_gateway(Duration::from_secs(30)).await;
    h.trunk.answer_register().await;

    // Loopback source, but the caller does not claim our trunk
    // identity: the local-testing exemption does not apply.
    assert_eq!(h.trunk.place_call("sip:attacker@evil.example").await, 403);
    loop {
        match next_update(&mut h.updates).await {
            DashboardMessage::CallRejected { reason, .. } => {
                assert_eq!(reason, "firewall");
                break;
            }
            _ => continue,
        }
    }
}
