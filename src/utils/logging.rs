//! Logging initialization for hubupdate.
//!
//! Supports three formats:
//! - `pretty`: multi-line human-readable output
//! - `component`: `[timestamp] [LEVEL] target message {fields}`, compact and grep-friendly;
//!   use the [`log_component!`] macro to add a `component` field for per-subsystem filtering
//! - `json`: structured JSON lines for log aggregators

use std::sync::Arc;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::Result;

/// Initialize the global tracing subscriber from config.
///
/// Call this once at startup before any tracing events are emitted.
/// `RUST_LOG` takes precedence over `cfg.level`. Fails only when the log
/// file cannot be opened.
pub fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));

    let file = match &cfg.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Some(Arc::new(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?,
            ))
        }
        None => None,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    // `try_init` so tests and embedders that already installed a subscriber
    // are left alone.
    let _ = match (cfg.format, file) {
        (LogFormat::Json, Some(file)) => builder.json().with_writer(file).try_init(),
        (LogFormat::Json, None) => builder.json().try_init(),
        (LogFormat::Pretty, Some(file)) => builder.pretty().with_writer(file).try_init(),
        (LogFormat::Pretty, None) => builder.pretty().try_init(),
        (LogFormat::Component, Some(file)) => builder
            .compact()
            .with_ansi(false)
            .with_writer(file)
            .try_init(),
        (LogFormat::Component, None) => builder.compact().try_init(),
    };
    Ok(())
}

/// Emit a component-tagged tracing event.
///
/// Works with any tracing level (`trace`, `debug`, `info`, `warn`, `error`).
///
/// ```
/// # use hubupdate::log_component;
/// log_component!(info, "backup", "snapshot created");
/// log_component!(warn, "orchestrator", "container missing", service = "influxdb");
/// ```
#[macro_export]
macro_rules! log_component {
    ($level:ident, $component:expr, $msg:expr) => {
        tracing::$level!(component = $component, $msg)
    };
    ($level:ident, $component:expr, $msg:expr, $($key:ident = $val:expr),+ $(,)?) => {
        tracing::$level!(component = $component, $($key = $val,)+ $msg)
    };
}
