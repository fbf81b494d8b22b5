//! Installed version record.
//!
//! Persists to `<data_dir>/version` as the YAML document `version: <semver>`.
//! Appliances installed by earlier releases carry `<data_dir>/version.yml`
//! instead; that record is read until the first commit.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, UpdateError};
use crate::utils::fs::write_atomic;
use crate::version::Version;

#[derive(Debug, Serialize, Deserialize)]
struct VersionRecord {
    #[serde(default)]
    version: Option<String>,
}

/// Read/write access to the installed version record.
#[derive(Debug, Clone)]
pub struct VersionStore {
    path: PathBuf,
    legacy: Option<PathBuf>,
}

impl VersionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path, legacy: None }
    }

    /// Also read `legacy` while the primary record does not exist.
    pub fn with_legacy(mut self, legacy: PathBuf) -> Self {
        self.legacy = Some(legacy);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The record `current()` reads: the primary one, or the legacy one
    /// when only that exists.
    pub fn record_path(&self) -> &Path {
        match &self.legacy {
            Some(legacy) if !self.path.exists() && legacy.exists() => legacy,
            _ => &self.path,
        }
    }

    /// The installed version.
    ///
    /// Fails with [`UpdateError::MissingState`] when the record is absent or
    /// has no `version` key, and with a parse error when it is corrupt.
    pub fn current(&self) -> Result<Version> {
        let path = self.record_path();
        if !path.exists() {
            return Err(UpdateError::MissingState(format!(
                "no version record at {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Err(UpdateError::MissingState(format!(
                "version record {} is empty",
                path.display()
            )));
        }
        let record: VersionRecord = serde_yaml::from_str(&content)?;
        let raw = record.version.ok_or_else(|| {
            UpdateError::MissingState(format!(
                "version record {} has no version key",
                path.display()
            ))
        })?;
        raw.parse()
    }

    /// The installed version, reading an absent or unreadable record as
    /// `0.0.0` (a fresh install).
    pub fn current_or_zero(&self) -> Version {
        match self.current() {
            Ok(v) => v,
            Err(UpdateError::MissingState(msg)) => {
                debug!("{}; assuming fresh install", msg);
                Version::zero()
            }
            Err(e) => {
                warn!(path = %self.record_path().display(), "Unreadable version record, assuming 0.0.0: {}", e);
                Version::zero()
            }
        }
    }

    /// Record `version` as installed. Atomic: a crash leaves either the old
    /// record or the new one.
    pub fn commit(&self, version: &Version) -> Result<()> {
        let record = VersionRecord {
            version: Some(version.to_string()),
        };
        let yaml = serde_yaml::to_string(&record)?;
        write_atomic(&self.path, yaml.as_bytes(), None)?;
        info!(version = %version, "Version record committed");
        Ok(())
    }
}
