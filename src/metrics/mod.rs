//! Metric events emitted by the update pipeline.
//!
//! Every controller transition and every step outcome becomes one
//! [`MetricEvent`]. Where the events end up is decided by the configured
//! [`MetricsSink`]; the time-series store itself is an external consumer.

mod sinks;

pub use sinks::{build_sink, FileSink, MemorySink, NullSink, TracingSink};

use serde::{Deserialize, Serialize};

use crate::controller::UpdateState;

/// One structured metric event. `measurement` names the series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "measurement", rename_all = "snake_case")]
pub enum MetricEvent {
    VersionCheck {
        current: String,
        latest: Option<String>,
        update_available: bool,
    },
    /// Fetch or validation failure that ended a check without mutation.
    UpdateCheck {
        success: bool,
        error: String,
    },
    SystemBackup {
        success: bool,
        path: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    UpdateStep {
        success: bool,
        duration_seconds: f64,
        version: String,
        step_type: String,
        step_number: usize,
        total_steps: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    UpdateVerification {
        success: bool,
        version: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Rollback {
        success: bool,
        duration_seconds: f64,
        backup_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    SystemUpdate {
        success: bool,
        duration_seconds: f64,
        steps_completed: usize,
        total_steps: usize,
        from_version: String,
        to_version: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    StateTransition {
        from: UpdateState,
        to: UpdateState,
    },
}

impl MetricEvent {
    /// Series name, identical to the serialized `measurement` tag.
    pub fn measurement(&self) -> &'static str {
        match self {
            MetricEvent::VersionCheck { .. } => "version_check",
            MetricEvent::UpdateCheck { .. } => "update_check",
            MetricEvent::SystemBackup { .. } => "system_backup",
            MetricEvent::UpdateStep { .. } => "update_step",
            MetricEvent::UpdateVerification { .. } => "update_verification",
            MetricEvent::Rollback { .. } => "rollback",
            MetricEvent::SystemUpdate { .. } => "system_update",
            MetricEvent::StateTransition { .. } => "state_transition",
        }
    }

    /// `false` for events that report a failure.
    pub fn is_success(&self) -> bool {
        match self {
            MetricEvent::VersionCheck { .. } | MetricEvent::StateTransition { .. } => true,
            MetricEvent::UpdateCheck { success, .. }
            | MetricEvent::SystemBackup { success, .. }
            | MetricEvent::UpdateStep { success, .. }
            | MetricEvent::UpdateVerification { success, .. }
            | MetricEvent::Rollback { success, .. }
            | MetricEvent::SystemUpdate { success, .. } => *success,
        }
    }
}

/// Destination for metric events.
///
/// Emission must never fail the update: sinks swallow and log their own
/// errors.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, event: &MetricEvent);
}
