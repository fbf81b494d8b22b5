//! Filesystem helpers shared by the state, backup and step modules.

use std::io::Write;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Replace `path` with `contents` atomically.
///
/// The bytes go to a temp file in the destination directory, are flushed to
/// disk, and the temp file is renamed over `path`. A crash at any point
/// leaves either the old file or the new one, never a truncated mix.
/// When `mode` is given it is applied before the rename; otherwise the
/// replaced file keeps its mode and new files get `0644`.
pub fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = match mode {
            Some(mode) => mode,
            None if path.exists() => file_mode(path)?.unwrap_or(0o644),
            None => 0o644,
        };
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Unix permission bits of `path`, if the platform has them.
pub fn file_mode(path: &Path) -> Result<Option<u32>> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Ok(Some(std::fs::metadata(path)?.permissions().mode() & 0o7777))
    }
    #[cfg(not(unix))]
    {
        let _ = std::fs::metadata(path)?;
        Ok(None)
    }
}
