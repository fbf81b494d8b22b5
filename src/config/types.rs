//! Configuration type definitions for hubupdate
//!
//! All types implement serde traits for YAML settings files and have the
//! defaults used on a stock appliance image.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct for the updater.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Remote release repository
    pub repository: RepositoryConfig,
    /// Scheduler intervals
    pub intervals: IntervalsConfig,
    /// Local state and configuration locations
    pub paths: PathsConfig,
    /// Managed services and restart strategy
    pub services: ServicesConfig,
    /// Metric event sink
    pub metrics: MetricsConfig,
    /// Log output
    pub logging: LoggingConfig,
}

// ============================================================================
// Repository
// ============================================================================

/// Where releases are published.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// `owner/name` of the repository
    pub repo: String,
    /// Branch that releases are read from
    pub branch: String,
    /// Raw-content host serving repository files
    pub base_url: String,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            repo: "sv-afterglow/data-hub".to_string(),
            branch: "main".to_string(),
            base_url: "https://raw.githubusercontent.com".to_string(),
            timeout_secs: 30,
        }
    }
}

impl RepositoryConfig {
    /// URL prefix every remote path is joined onto.
    pub fn root_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.repo.trim_matches('/'),
            self.branch
        )
    }
}

// ============================================================================
// Intervals
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    /// Seconds between version checks
    pub update_check_secs: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            update_check_secs: 3600,
        }
    }
}

// ============================================================================
// Paths
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Holds the version record and the update journal
    pub data_dir: PathBuf,
    /// Local configuration tree that `service_config` steps write into
    pub config_dir: PathBuf,
    /// Root for pre-update snapshots
    pub backup_dir: PathBuf,
    /// Compose document describing the managed services
    pub compose_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/data/state"),
            config_dir: PathBuf::from("/config"),
            backup_dir: PathBuf::from("/data/backups"),
            compose_file: PathBuf::from("/app/repo/docker/compose/docker-compose.yaml"),
        }
    }
}

impl PathsConfig {
    pub fn version_file(&self) -> PathBuf {
        self.data_dir.join("version")
    }

    /// Record name used by earlier updater releases.
    pub fn legacy_version_file(&self) -> PathBuf {
        self.data_dir.join("version.yml")
    }

    pub fn journal_file(&self) -> PathBuf {
        self.data_dir.join("update_journal.json")
    }
}

// ============================================================================
// Services
// ============================================================================

/// How services are stopped and re-created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartStrategy {
    /// Delegate stop/rm/up to the compose tool.
    #[default]
    Compose,
    /// Drive the container runtime directly.
    Direct,
}

impl std::str::FromStr for RestartStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compose" => Ok(RestartStrategy::Compose),
            "direct" | "docker" => Ok(RestartStrategy::Direct),
            other => Err(format!("unknown restart strategy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    pub strategy: RestartStrategy,
    /// Compose project name (container name prefix and label value)
    pub project_name: String,
    /// Bridge network the services share. Defaults to `<project>_data-hub`.
    pub network: Option<String>,
    /// Services never restarted implicitly and not required to be running
    pub excluded: Vec<String>,
    /// Container runtime binary
    pub docker_binary: String,
    /// Compose tool binary
    pub compose_binary: String,
    /// Timeout for each runtime/compose invocation
    pub command_timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            strategy: RestartStrategy::default(),
            project_name: "compose".to_string(),
            network: None,
            excluded: vec!["update_service".to_string(), "watchtower".to_string()],
            docker_binary: "docker".to_string(),
            compose_binary: "docker-compose".to_string(),
            command_timeout_secs: 300,
        }
    }
}

impl ServicesConfig {
    pub fn network_name(&self) -> String {
        self.network
            .clone()
            .unwrap_or_else(|| format!("{}_data-hub", self.project_name))
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsSinkKind {
    /// Structured tracing events
    #[default]
    Log,
    /// JSON lines appended to a file
    File,
    /// Discard
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub sink: MetricsSinkKind,
    /// Target file for the `file` sink
    pub file: Option<PathBuf>,
}

// ============================================================================
// Logging
// ============================================================================

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    /// Compact `target message {fields}` lines
    #[default]
    Component,
    /// JSON lines for log aggregators
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Append logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}
