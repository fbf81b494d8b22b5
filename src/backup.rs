//! Pre-update snapshots of mutable appliance state.
//!
//! A snapshot captures the version record, every file under the
//! configuration tree and the compose document into
//! `<backup_dir>/backup_YYYYMMDD_HHMMSS/`, plus a `snapshot.json` index
//! recording each file's SHA-256 and mode. Files that did not exist are
//! recorded as absent so a restore can remove them again.
//!
//! The index is written last; a directory without one is not a snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::PathsConfig;
use crate::error::{Result, UpdateError};
use crate::utils::fs::{file_mode, sha256_hex, write_atomic};

const INDEX_FILE: &str = "snapshot.json";

/// State of one tracked path at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CapturedFile {
    Present {
        /// Location of the copy, relative to the snapshot directory.
        stored: PathBuf,
        sha256: String,
        mode: Option<u32>,
    },
    Absent,
}

/// An immutable, on-disk snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub id: String,
    pub created_at: String,
    /// Configuration tree the snapshot covers in full.
    pub config_root: PathBuf,
    pub captured_paths: BTreeMap<PathBuf, CapturedFile>,
    #[serde(skip)]
    dir: PathBuf,
}

impl BackupSnapshot {
    /// Snapshot directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of files captured with content.
    pub fn file_count(&self) -> usize {
        self.captured_paths
            .values()
            .filter(|c| matches!(c, CapturedFile::Present { .. }))
            .count()
    }
}

/// Creates and restores snapshots.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
    version_file: PathBuf,
    config_dir: PathBuf,
    compose_file: PathBuf,
    excluded: Vec<PathBuf>,
}

impl BackupManager {
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            backup_dir: paths.backup_dir.clone(),
            version_file: paths.version_file(),
            config_dir: paths.config_dir.clone(),
            compose_file: paths.compose_file.clone(),
            excluded: Vec::new(),
        }
    }

    /// Leave these paths out of the configuration tree: they are neither
    /// captured nor pruned or rewritten by a restore.
    pub fn excluding(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.excluded.extend(paths);
        self
    }

    /// Capture current state. Any I/O failure is [`UpdateError::BackupFailed`]
    /// and leaves no partial snapshot behind.
    pub fn snapshot(&self) -> Result<BackupSnapshot> {
        let (id, dir) = self
            .create_snapshot_dir()
            .map_err(|e| UpdateError::BackupFailed(e.to_string()))?;

        match self.capture_into(&id, &dir) {
            Ok(snapshot) => {
                info!(
                    backup_id = %snapshot.id,
                    files = snapshot.file_count(),
                    "Snapshot created"
                );
                Ok(snapshot)
            }
            Err(e) => {
                if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                    warn!(dir = %dir.display(), "Could not remove partial snapshot: {}", cleanup);
                }
                Err(UpdateError::BackupFailed(e.to_string()))
            }
        }
    }

    fn create_snapshot_dir(&self) -> Result<(String, PathBuf)> {
        std::fs::create_dir_all(&self.backup_dir)?;
        let base = format!(
            "backup_{}",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        );
        let mut id = base.clone();
        let mut n = 1;
        loop {
            let dir = self.backup_dir.join(&id);
            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok((id, dir)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    id = format!("{base}_{n}");
                    n += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn capture_into(&self, id: &str, dir: &Path) -> Result<BackupSnapshot> {
        let mut captured = BTreeMap::new();

        capture_file(&self.version_file, Path::new("state/version"), dir, &mut captured)?;

        let compose_name = self
            .compose_file
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("docker-compose.yaml"));
        capture_file(
            &self.compose_file,
            &Path::new("compose").join(compose_name),
            dir,
            &mut captured,
        )?;

        for path in self.config_files()? {
            let rel = path
                .strip_prefix(&self.config_dir)
                .map_err(|e| UpdateError::BackupFailed(e.to_string()))?;
            capture_file(&path, &Path::new("config").join(rel), dir, &mut captured)?;
        }

        let snapshot = BackupSnapshot {
            id: id.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            config_root: self.config_dir.clone(),
            captured_paths: captured,
            dir: dir.to_path_buf(),
        };
        let index = serde_json::to_vec_pretty(&snapshot)?;
        write_atomic(&dir.join(INDEX_FILE), &index, None)?;
        Ok(snapshot)
    }

    /// Regular files currently under the configuration tree, excluding the
    /// backup directory should it live inside it and any excluded path.
    fn config_files(&self) -> Result<Vec<PathBuf>> {
        if !self.config_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.config_dir).into_iter().filter_entry(|e| {
            !e.path().starts_with(&self.backup_dir)
                && !self.excluded.iter().any(|x| e.path().starts_with(x))
        });
        for entry in walker {
            let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            } else if entry.file_type().is_symlink() {
                debug!(path = %entry.path().display(), "Skipping symlink in config tree");
            }
        }
        Ok(files)
    }

    /// Put every tracked path back to its captured state.
    ///
    /// All captured copies are read and hash-checked before anything is
    /// written. Failure at any point is [`UpdateError::RestoreFailed`].
    pub fn restore(&self, snapshot: &BackupSnapshot) -> Result<()> {
        self.restore_inner(snapshot)
            .map_err(|e| match e {
                UpdateError::RestoreFailed(msg) => UpdateError::RestoreFailed(msg),
                other => UpdateError::RestoreFailed(format!("{}: {other}", snapshot.id)),
            })?;
        info!(backup_id = %snapshot.id, "Snapshot restored");
        Ok(())
    }

    fn restore_inner(&self, snapshot: &BackupSnapshot) -> Result<()> {
        let mut contents = Vec::with_capacity(snapshot.captured_paths.len());
        for (original, captured) in &snapshot.captured_paths {
            match captured {
                CapturedFile::Present {
                    stored,
                    sha256,
                    mode,
                } => {
                    let bytes = std::fs::read(snapshot.dir.join(stored))?;
                    if &sha256_hex(&bytes) != sha256 {
                        return Err(UpdateError::RestoreFailed(format!(
                            "{}: stored copy of {} is corrupt",
                            snapshot.id,
                            original.display()
                        )));
                    }
                    contents.push((original, Some((bytes, *mode))));
                }
                CapturedFile::Absent => contents.push((original, None)),
            }
        }

        for (original, content) in contents {
            match content {
                Some((bytes, mode)) => write_atomic(original, &bytes, mode)?,
                None => remove_if_present(original)?,
            }
        }

        // Anything added to the configuration tree since the snapshot goes.
        if snapshot.config_root == self.config_dir {
            for path in self.config_files()? {
                if !snapshot.captured_paths.contains_key(&path) {
                    debug!(path = %path.display(), "Removing file created after snapshot");
                    remove_if_present(&path)?;
                }
            }
        }
        Ok(())
    }

    /// Re-open a snapshot from its index.
    pub fn load(&self, id: &str) -> Result<BackupSnapshot> {
        let dir = self.backup_dir.join(id);
        read_index(&dir).map_err(|e| {
            UpdateError::RestoreFailed(format!("snapshot {id} cannot be read back: {e}"))
        })
    }

    /// All snapshots under the backup directory, oldest first.
    pub fn list(&self) -> Result<Vec<BackupSnapshot>> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut snapshots = Vec::new();
        for entry in std::fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match read_index(&entry.path()) {
                Ok(s) => snapshots.push(s),
                Err(e) => debug!(dir = %entry.path().display(), "Not a snapshot: {}", e),
            }
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(snapshots)
    }
}

fn read_index(dir: &Path) -> Result<BackupSnapshot> {
    let raw = std::fs::read(dir.join(INDEX_FILE))?;
    let mut snapshot: BackupSnapshot = serde_json::from_slice(&raw)?;
    snapshot.dir = dir.to_path_buf();
    Ok(snapshot)
}

fn capture_file(
    original: &Path,
    stored: &Path,
    snapshot_dir: &Path,
    captured: &mut BTreeMap<PathBuf, CapturedFile>,
) -> Result<()> {
    if captured.contains_key(original) {
        return Ok(());
    }
    if !original.exists() {
        captured.insert(original.to_path_buf(), CapturedFile::Absent);
        return Ok(());
    }
    let bytes = std::fs::read(original)?;
    let mode = file_mode(original)?;
    let dest = snapshot_dir.join(stored);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&dest, &bytes)?;
    captured.insert(
        original.to_path_buf(),
        CapturedFile::Present {
            stored: stored.to_path_buf(),
            sha256: sha256_hex(&bytes),
            mode,
        },
    );
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
