//! Dashboard WebSocket: outbound broadcast and inbound call control.
//!
//! Every connected client receives the same JSON stream, discriminated
//! by `type`. Inbound messages are the small command set the UI needs;
//! anything unparseable is logged and dropped. A broken client only
//! loses its own connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use voxgate_realtime_ai::UsageSnapshot;

/// Outbound dashboard messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardMessage {
    Status {
        sip_registered: bool,
        call_active: bool,
        active_agent: Option<String>,
        available_agents: Vec<String>,
    },
    CallIncoming {
        caller: String,
    },
    CallActive {
        caller: String,
    },
    CallRejected {
        caller: String,
        reason: String,
    },
    CallEnded {
        caller: String,
        reason: String,
        duration_seconds: i64,
        cost_cents: f64,
    },
    Transcript {
        role: String,
        text: String,
        is_final: bool,
    },
    FunctionCall {
        name: String,
        args: Value,
    },
    FunctionResult {
        name: String,
        result: String,
    },
    AgentChanged {
        from: Option<String>,
        to: String,
    },
    ModelChanged {
        model: String,
    },
    AiState {
        state: String,
    },
    CallCost {
        cost_cents: f64,
        usage: UsageSnapshot,
    },
    /// Emitted by the coding agent's background tasks (external).
    CodingProgress {
        task_id: String,
        progress: f64,
        message: String,
    },
    /// Emitted by the ideas agent (external).
    IdeaUpdate {
        idea: Value,
    },
    /// Emitted by the ideas agent (external).
    ProjectUpdate {
        project: Value,
    },
    FirewallStatus {
        enabled: bool,
    },
    BlacklistUpdated,
    WhitelistUpdated,
}

/// Inbound dashboard commands.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardCommand {
    AcceptCall,
    Hangup,
    MuteAi,
    UnmuteAi,
    SwitchAgent { agent_name: String },
}

/// Shared state for the `/ws` endpoint.
pub struct DashboardState {
    pub broadcast: broadcast::Sender<DashboardMessage>,
    pub commands: mpsc::Sender<DashboardCommand>,
    /// Snapshot provider for the initial status message.
    pub status: Arc<dyn Fn() -> DashboardMessage + Send + Sync>,
}

/// Fire-and-forget broadcast; no receivers is fine.
pub fn broadcast(tx: &broadcast::Sender<DashboardMessage>, message: DashboardMessage) {
    let _ = tx.send(message);
}

/// Build the dashboard router.
pub fn router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

/// Bind and serve until the process ends.
pub async fn serve(state: Arc<DashboardState>, host: &str, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!("dashboard listening on {}:{}", host, port);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<DashboardState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_loop(socket, state))
}

async fn client_loop(socket: WebSocket, state: Arc<DashboardState>) {
    let (mut sink, mut source) = socket.split();
    let mut updates = state.broadcast.subscribe();

    // Fresh clients get the current status immediately.
    let status = (state.status)();
    if let Ok(text) = serde_json::to_string(&status) {
        if sink.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }
    info!("dashboard client connected");

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Ok(message) => {
                        let Ok(text) = serde_json::to_string(&message) else {
                            continue;
                        };
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("dashboard client lagged, skipped {} messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<DashboardCommand>(&text) {
                            Ok(command) => {
                                let _ = state.commands.send(command).await;
                            }
                            Err(e) => warn!("unparseable dashboard command: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("dashboard client error: {}", e);
                        break;
                    }
                }
            }
        }
    }
    info!("dashboard client disconnected");
}
