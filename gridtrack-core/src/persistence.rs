//! Local persistence helpers: atomic JSON writes and directory swaps.

use std::io;
use std::path::{Path, PathBuf};

/// Atomically write pretty-printed JSON to `path`.
///
/// Writes a `.tmp` sibling, then renames over the target. Creates parent
/// directories if they don't exist.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Atomically write raw bytes to `path`.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load JSON from `path`. Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// Replace `target` with the directory `staged`.
///
/// The previous contents are moved aside first and removed only after the
/// new directory is in place, so `target` is never left half-written.
pub fn replace_dir(staged: &Path, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let backup = sibling(target, "old");
    if backup.exists() {
        std::fs::remove_dir_all(&backup)?;
    }
    let had_previous = target.exists();
    if had_previous {
        std::fs::rename(target, &backup)?;
    }
    if let Err(e) = std::fs::rename(staged, target) {
        if had_previous {
            let _ = std::fs::rename(&backup, target);
        }
        return Err(e);
    }
    if had_previous {
        std::fs::remove_dir_all(&backup)?;
    }
    Ok(())
}

/// `dir/.name.<suffix>` next to `path`.
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{name}.{suffix}"))
}
