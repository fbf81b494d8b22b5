//! Metric sink implementations.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use super::{MetricEvent, MetricsSink};
use crate::config::{MetricsConfig, MetricsSinkKind};
use crate::error::{Result, UpdateError};

/// Emits each event as a structured `tracing` event.
///
/// Events carry `metric = true` so log pipelines can route them to the
/// time-series store.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn emit(&self, event: &MetricEvent) {
        let fields = serde_json::to_string(event).unwrap_or_default();
        if event.is_success() {
            info!(
                metric = true,
                measurement = event.measurement(),
                fields = %fields,
                "metric event"
            );
        } else {
            warn!(
                metric = true,
                measurement = event.measurement(),
                fields = %fields,
                "metric event"
            );
        }
    }
}

/// Appends each event as one JSON line, stamped with the emission time.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn append(&self, event: &MetricEvent) -> Result<()> {
        let mut value = serde_json::to_value(event)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "time".to_string(),
                serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        let _guard = self
            .lock
            .lock()
            .map_err(|_| UpdateError::Config("metrics file lock poisoned".into()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{value}")?;
        Ok(())
    }
}

impl MetricsSink for FileSink {
    fn emit(&self, event: &MetricEvent) {
        if let Err(e) = self.append(event) {
            warn!(path = %self.path.display(), "Failed to write metric event: {}", e);
        }
    }
}

/// Keeps every event in memory. Useful for tests and for summarising an
/// attempt in the CLI.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<MetricEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events recorded so far.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events with the given measurement name.
    pub fn by_measurement(&self, measurement: &str) -> Vec<MetricEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.measurement() == measurement)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl MetricsSink for MemorySink {
    fn emit(&self, event: &MetricEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn emit(&self, _event: &MetricEvent) {}
}

/// Build the sink selected in configuration.
pub fn build_sink(config: &MetricsConfig) -> Result<Arc<dyn MetricsSink>> {
    match config.sink {
        MetricsSinkKind::Log => Ok(Arc::new(TracingSink)),
        MetricsSinkKind::None => Ok(Arc::new(NullSink)),
        MetricsSinkKind::File => {
            let path = config.file.clone().ok_or_else(|| {
                UpdateError::Config("metrics.file is required for the file sink".into())
            })?;
            Ok(Arc::new(FileSink::new(path)))
        }
    }
}
