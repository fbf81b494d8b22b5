//! Update journal: crash-safe record of the attempt in flight.
//!
//! Persists to `<data_dir>/update_journal.json`. The controller writes an
//! entry as soon as the snapshot exists, advances its phase as the attempt
//! progresses, and removes it once the attempt is committed or rolled back.
//! A journal found at startup means the previous process died mid-attempt.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, UpdateError};
use crate::utils::fs::write_atomic;
use crate::version::Version;

/// How far the journaled attempt got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalPhase {
    /// Snapshot taken, steps being applied. Version not yet committed.
    Applying,
    /// Version committed; restart and verification outstanding.
    Committed,
    /// Restore failed. Nothing runs until an operator acknowledges.
    Fatal,
}

/// Persisted description of one update attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub attempt_id: String,
    pub from_version: Version,
    pub to_version: Version,
    pub backup_id: String,
    pub phase: JournalPhase,
    /// Services the attempt restarts. Empty until computed.
    #[serde(default)]
    pub restart_set: Vec<String>,
    pub started_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl JournalEntry {
    pub fn new(
        attempt_id: &str,
        from_version: Version,
        to_version: Version,
        backup_id: &str,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            attempt_id: attempt_id.to_string(),
            from_version,
            to_version,
            backup_id: backup_id.to_string(),
            phase: JournalPhase::Applying,
            restart_set: Vec::new(),
            started_at: now.clone(),
            updated_at: now,
            error: None,
        }
    }

    /// Move to `phase`, refreshing `updated_at`.
    pub fn advance(&mut self, phase: JournalPhase) {
        self.phase = phase;
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

/// File-backed journal.
#[derive(Debug, Clone)]
pub struct UpdateJournal {
    path: PathBuf,
}

impl UpdateJournal {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the pending entry, if any.
    ///
    /// An unreadable journal is reported as needing an operator: guessing
    /// what a half-written attempt did is worse than stopping.
    pub fn load(&self) -> Result<Option<JournalEntry>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map(Some).map_err(|e| {
            UpdateError::OperatorIntervention(format!(
                "update journal {} is unreadable: {e}",
                self.path.display()
            ))
        })
    }

    /// Save `entry` atomically (write temp file + rename).
    pub fn save(&self, entry: &JournalEntry) -> Result<()> {
        let json = serde_json::to_string_pretty(entry)?;
        write_atomic(&self.path, json.as_bytes(), None)?;
        debug!(attempt = %entry.attempt_id, phase = ?entry.phase, "Journal saved");
        Ok(())
    }

    /// Remove the journal. Absence is not an error.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Journal cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Clear a journal left in the [`JournalPhase::Fatal`] phase after an
    /// operator has repaired the appliance. Returns the cleared entry.
    /// An unreadable journal is removed too and reported as `None`.
    pub fn acknowledge(&self) -> Result<Option<JournalEntry>> {
        let entry = match self.load() {
            Ok(entry) => entry,
            Err(UpdateError::OperatorIntervention(_)) => None,
            Err(e) => return Err(e),
        };
        if self.path.exists() {
            self.clear()?;
            info!("Update journal acknowledged and cleared");
        }
        Ok(entry)
    }
}
