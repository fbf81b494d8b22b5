//! hubupdate - self-update orchestrator for data hub appliances
//!
//! Polls a release repository, applies versioned update manifests to the
//! running appliance, restarts and verifies its services, and restores a
//! pre-update snapshot when anything goes wrong.

pub mod backup;
pub mod config;
pub mod controller;
pub mod error;
pub mod manifest;
pub mod metrics;
pub mod services;
pub mod state;
pub mod steps;
pub mod utils;
pub mod verify;
pub mod version;

pub use backup::{BackupManager, BackupSnapshot};
pub use config::UpdaterConfig;
pub use controller::{TickOutcome, UpdateController, UpdateState};
pub use error::{Result, UpdateError};
pub use manifest::{Fetcher, Manifest, ManifestClient, Step};
pub use metrics::{MetricEvent, MetricsSink};
pub use services::{CommandOutput, CommandRunner, ServiceOrchestrator};
pub use version::Version;
