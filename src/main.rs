//! avatar-relay server entry point.
//!
//! Reads configuration from the environment and serves `/ws` and `/health`.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use avatar_relay::app_state::AppState;
use avatar_relay::config::RelayConfig;
use avatar_relay::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config =
        RelayConfig::from_env().map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let addr = config.listen_addr;
    tracing::info!(
        addr = %addr,
        origins = ?config.allowed_origins,
        drop_malformed = config.drop_malformed,
        "starting avatar-relay"
    );

    let state = AppState::new(config);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "server listening");

    server::serve(listener, state).await?;

    Ok(())
}
