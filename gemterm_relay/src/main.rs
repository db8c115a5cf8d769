use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tracing::info;

use gemterm_relay::{app, config::RelayConfig, logging, provider::GeminiProvider, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::configure_logging()?;

    let config = RelayConfig::from_env().context("failed to load relay configuration")?;
    let provider = GeminiProvider::new(reqwest::Client::new(), &config.base_url, &config.api_key);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(
        "Serving {} and /api/chat (model = {})",
        config.static_dir.display(),
        config.model
    );
    let state = Arc::new(AppState::new(config, Arc::new(provider)));

    info!("listening on {}", addr);
    axum::Server::try_bind(&addr)
        .with_context(|| format!("failed to bind {addr}"))?
        .serve(app(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
