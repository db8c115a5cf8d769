use anyhow::Context;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Installs the global subscriber: compact lines with a wall-clock time, no
/// module targets, filtered by `RUST_LOG` (default `info`).
pub fn configure_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::time());
    let subscriber = Registry::default().with(filter).with(stdout_log);

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")
}
