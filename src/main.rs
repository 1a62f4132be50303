//! Progression Server
//!
//! Serves the progression engine over WebSocket.
//! Configuration comes from the environment; state is checkpointed to
//! `STATE_PATH` when set.

use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use progression::{
    config::EngineConfig,
    core::SystemClock,
    engine::ProgressionEngine,
    network::{AuthConfig, JwtSessionResolver, ProgressionServer, RequestHandler, ServerConfig},
    store::Snapshot,
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Progression Server v{}", VERSION);

    let engine_config = EngineConfig::from_env()?;
    let auth_config = AuthConfig::from_env();
    let server_config = ServerConfig::from_env()?;

    if !auth_config.is_configured() {
        warn!("No JWT key configured, every session will be rejected");
    }
    info!(
        "Day boundary offset: {} min, coin ceiling: {}",
        engine_config.day_boundary.offset().local_minus_utc() / 60,
        engine_config.coin_ceiling_per_operation
    );

    let state_path = engine_config.state_path.clone();
    let snapshot = match state_path.as_deref() {
        Some(path) => Snapshot::load(path)?,
        None => None,
    };
    let engine = match snapshot {
        Some(snapshot) => {
            info!("Restored {} player(s) from snapshot", snapshot.players.len());
            ProgressionEngine::from_snapshot(engine_config, Arc::new(SystemClock), snapshot)
        }
        None => ProgressionEngine::new(engine_config),
    };
    let engine = Arc::new(engine);

    let resolver = Arc::new(JwtSessionResolver::new(auth_config));
    let handler = RequestHandler::new(engine.clone(), resolver, VERSION);
    let server = ProgressionServer::new(server_config, handler);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    if let Some(path) = state_path.as_deref() {
        engine.save_snapshot(path).await?;
    }

    Ok(())
}
