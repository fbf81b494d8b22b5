//! Controller states and tick outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::version::Version;

/// Where the controller is in an update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Idle,
    CheckingVersion,
    BackingUp,
    ApplyingSteps,
    RestartingServices,
    Verifying,
    Committed,
    RolledBack,
    Fatal,
}

impl UpdateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::CheckingVersion => "checking_version",
            UpdateState::BackingUp => "backing_up",
            UpdateState::ApplyingSteps => "applying_steps",
            UpdateState::RestartingServices => "restarting_services",
            UpdateState::Verifying => "verifying",
            UpdateState::Committed => "committed",
            UpdateState::RolledBack => "rolled_back",
            UpdateState::Fatal => "fatal",
        }
    }
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one scheduler tick or explicit apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another attempt was in flight; nothing done.
    Busy,
    /// Nothing newer is published (or the latest version is unknown).
    NoUpdate {
        current: Version,
        latest: Option<Version>,
    },
    /// The manifest could not be fetched or failed validation.
    CheckFailed { target: Version, reason: String },
    /// The manifest requires a newer installed version.
    Rejected {
        target: Version,
        required: Version,
        current: Version,
    },
    /// The snapshot could not be taken; nothing was changed.
    Aborted { target: Version, reason: String },
    /// Update applied and verified.
    Committed { from: Version, to: Version },
    /// Update failed and the snapshot was restored.
    RolledBack {
        from: Version,
        to: Version,
        reason: String,
    },
}

impl TickOutcome {
    /// `true` if the appliance state changed and stayed changed.
    pub fn is_committed(&self) -> bool {
        matches!(self, TickOutcome::Committed { .. })
    }
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickOutcome::Busy => write!(f, "busy: an update attempt is already running"),
            TickOutcome::NoUpdate { current, latest } => match latest {
                Some(latest) => write!(f, "up to date: installed {current}, latest {latest}"),
                None => write!(f, "installed {current}; latest version unknown"),
            },
            TickOutcome::CheckFailed { target, reason } => {
                write!(f, "update to {target} not attempted: {reason}")
            }
            TickOutcome::Rejected {
                target,
                required,
                current,
            } => write!(
                f,
                "update to {target} rejected: requires {required}, installed {current}"
            ),
            TickOutcome::Aborted { target, reason } => {
                write!(f, "update to {target} aborted before any change: {reason}")
            }
            TickOutcome::Committed { from, to } => write!(f, "updated {from} -> {to}"),
            TickOutcome::RolledBack { from, to, reason } => {
                write!(f, "update {from} -> {to} rolled back: {reason}")
            }
        }
    }
}
