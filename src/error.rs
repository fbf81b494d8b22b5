//! Error types for hubupdate
//!
//! Every failure the update pipeline can hit is a variant of [`UpdateError`].
//! Uses `thiserror` for `Display` and `Error` implementations. The
//! classification helpers decide how the controller reacts: roll back,
//! retry on the next tick, or stop the process.

use thiserror::Error;

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for update operations.
#[derive(Error, Debug)]
pub enum UpdateError {
    /// No persisted state exists yet (fresh install).
    #[error("Missing state: {0}")]
    MissingState(String),

    /// Remote repository unreachable; retried on the next tick.
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    /// Manifest missing, malformed, or failing schema validation.
    #[error("Manifest unavailable: {0}")]
    ManifestUnavailable(String),

    /// Manifest is well-formed but cannot be applied to this installation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Pre-update snapshot could not be taken.
    #[error("Backup failed: {0}")]
    BackupFailed(String),

    /// A manifest step failed (1-based step number).
    #[error("Step {step} failed: {message}")]
    StepFailed { step: usize, message: String },

    /// A manifest step of an unrecognized type reached the executor.
    #[error("Unknown step type: {0}")]
    UnknownStepType(String),

    /// A restart declaration names a service the compose document does not declare.
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// Stopping, re-creating or starting a service failed.
    #[error("Restart failed: {0}")]
    RestartFailed(String),

    /// Post-update verification did not pass.
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// A snapshot could not be restored. The appliance may be in a mixed state.
    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    /// A previous attempt left the appliance unverifiable; an operator must act.
    #[error("Operator intervention required: {0}")]
    OperatorIntervention(String),

    /// Configuration-related errors (invalid settings, bad overrides, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl UpdateError {
    /// Returns `true` if this error, raised after the snapshot was taken,
    /// must be answered by restoring that snapshot.
    pub fn triggers_rollback(&self) -> bool {
        matches!(
            self,
            UpdateError::StepFailed { .. }
                | UpdateError::UnknownStepType(_)
                | UpdateError::UnknownService(_)
                | UpdateError::RestartFailed(_)
                | UpdateError::VerificationFailed(_)
        )
    }

    /// Returns `true` if the process cannot continue without an operator.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            UpdateError::RestoreFailed(_) | UpdateError::OperatorIntervention(_)
        )
    }

    /// Short machine-friendly label for the `error_kind` log field.
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateError::MissingState(_) => "missing_state",
            UpdateError::TransientFetch(_) => "transient_fetch",
            UpdateError::ManifestUnavailable(_) => "manifest_unavailable",
            UpdateError::Validation(_) => "validation",
            UpdateError::BackupFailed(_) => "backup_failed",
            UpdateError::StepFailed { .. } => "step_failed",
            UpdateError::UnknownStepType(_) => "unknown_step_type",
            UpdateError::UnknownService(_) => "unknown_service",
            UpdateError::RestartFailed(_) => "restart_failed",
            UpdateError::VerificationFailed(_) => "verification_failed",
            UpdateError::RestoreFailed(_) => "restore_failed",
            UpdateError::OperatorIntervention(_) => "operator_intervention",
            UpdateError::Config(_) => "config",
            UpdateError::Io(_) => "io",
            UpdateError::Json(_) => "json",
            UpdateError::Yaml(_) => "yaml",
            UpdateError::Http(_) => "http",
        }
    }
}

/// A specialized `Result` type for update operations.
pub type Result<T> = std::result::Result<T, UpdateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UpdateError::Config("missing repo".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing repo");
    }

    #[test]
    fn test_step_failed_display() {
        let err = UpdateError::StepFailed {
            step: 3,
            message: "download returned 404".into(),
        };
        assert_eq!(err.to_string(), "Step 3 failed: download returned 404");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: UpdateError = io_err.into();
        assert!(matches!(err, UpdateError::Io(_)));
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_triggers_rollback() {
        assert!(UpdateError::StepFailed {
            step: 1,
            message: "x".into()
        }
        .triggers_rollback());
        assert!(UpdateError::UnknownStepType("x".into()).triggers_rollback());
        assert!(UpdateError::UnknownService("x".into()).triggers_rollback());
        assert!(UpdateError::RestartFailed("x".into()).triggers_rollback());
        assert!(UpdateError::VerificationFailed("x".into()).triggers_rollback());

        // Raised before any mutation
        assert!(!UpdateError::TransientFetch("x".into()).triggers_rollback());
        assert!(!UpdateError::ManifestUnavailable("x".into()).triggers_rollback());
        assert!(!UpdateError::Validation("x".into()).triggers_rollback());
        assert!(!UpdateError::BackupFailed("x".into()).triggers_rollback());
    }

    #[test]
    fn test_is_fatal() {
        assert!(UpdateError::RestoreFailed("x".into()).is_fatal());
        assert!(UpdateError::OperatorIntervention("x".into()).is_fatal());
        assert!(!UpdateError::BackupFailed("x".into()).is_fatal());
        assert!(!UpdateError::RestartFailed("x".into()).is_fatal());
    }
}
