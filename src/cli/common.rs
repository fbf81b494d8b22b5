//! Shared helpers for CLI command handlers.

use std::path::Path;

use anyhow::{Context, Result};

use hubupdate::utils::logging::init_logging;
use hubupdate::UpdaterConfig;

/// Load settings from `path` (missing file means defaults), apply
/// environment overrides and install the configured logger.
pub(crate) fn load_config(path: &Path) -> Result<UpdaterConfig> {
    let config = UpdaterConfig::load_from_path(path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    init_logging(&config.logging).context("Failed to initialize logging")?;
    tracing::debug!(path = %path.display(), "Settings loaded");
    Ok(config)
}

/// Await Ctrl-C (and SIGTERM on unix).
pub(crate) async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
