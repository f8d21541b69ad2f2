//! Voxgate gateway binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use voxgate_gateway::dashboard::{self, DashboardState};
use voxgate_gateway::orchestrator::{default_registry, Orchestrator};
use voxgate_gateway::store::{self, BlacklistStore, CallLogStore};
use voxgate_gateway::{GatewayConfig, TrunkFirewall};
use voxgate_sip_engine::{SipEngine, SipEngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env().context("configuration error")?;
    info!(
        "starting voxgate: trunk {}@{}, dashboard {}:{}",
        config.sip_user, config.sip_server, config.api_host, config.api_port
    );

    let pool = store::open_database(&config.database_path).await?;
    let blacklist = BlacklistStore::new(pool.clone());
    let call_log = CallLogStore::new(pool);

    let registry = default_registry(&config.access_code);
    let firewall = Arc::new(TrunkFirewall::new(
        config.firewall_enabled,
        config.identity_uri(),
        config.sip_server.clone(),
    ));

    let mut engine_config = SipEngineConfig::new(
        config.sip_server.clone(),
        config.sip_user.clone(),
        config.sip_password.clone(),
    );
    engine_config.server_port = config.sip_port;
    engine_config.public_ip = config.public_ip;
    let (engine, events) = SipEngine::start(engine_config).await?;

    let (updates_tx, _) = broadcast::channel(256);
    let (commands_tx, commands_rx) = mpsc::channel(32);

    let orchestrator = Orchestrator::new(
        config.clone(),
        engine,
        registry,
        blacklist,
        call_log,
        firewall,
        updates_tx.clone(),
    );

    let dashboard_state = Arc::new(DashboardState {
        broadcast: updates_tx,
        commands: commands_tx,
        status: orchestrator.status_provider(),
    });
    let api_host = config.api_host.clone();
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = dashboard::serve(dashboard_state, &api_host, api_port).await {
            error!("dashboard server failed: {}", e);
        }
    });

    tokio::select! {
        _ = orchestrator.run(events, commands_rx) => {
            error!("orchestrator stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}
