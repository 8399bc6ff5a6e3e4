//! Filesystem utilities for crash-safe writes and timestamps.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::TimeZone;
use tracing::warn;

use crate::error::HoardResult;

/// Suffix appended to backup copies of records and branch folders.
pub const BACKUP_SUFFIX: &str = "_last";

/// Location of the backup copy for `path` (`<path>_last`).
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Write data to a file atomically using temp-file-then-rename.
///
/// On POSIX, `rename()` within the same filesystem is atomic: either the
/// old file or the new file is visible, never a partial write.
pub fn atomic_write(path: &Path, data: &[u8]) -> HoardResult<()> {
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_data()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Copy the current version of `path` to its backup, then write `data`.
///
/// The backup is best-effort: a failed copy is logged and the write proceeds.
pub fn write_with_backup(path: &Path, data: &[u8]) -> HoardResult<()> {
    if path.exists() {
        if let Err(e) = fs::copy(path, backup_path(path)) {
            warn!("could not back up {}: {e}", path.display());
        }
    }
    atomic_write(path, data)
}

/// Modification time of a file in integer milliseconds since the epoch.
pub fn mtime_ms(meta: &fs::Metadata) -> io::Result<i64> {
    let modified = meta.modified()?;
    Ok(system_time_ms(modified))
}

/// Convert a `SystemTime` to milliseconds since the epoch (negative before 1970).
pub fn system_time_ms(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> i64 {
    system_time_ms(SystemTime::now())
}

/// Render a millisecond timestamp as local date and time.
pub fn format_time(ms: i64) -> String {
    match chrono::Local.timestamp_millis_opt(ms).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ms.to_string(),
    }
}

/// Reset a file's modification time to `ms` milliseconds since the epoch.
pub fn set_mtime_ms(path: &Path, ms: i64) -> io::Result<()> {
    let time = if ms >= 0 {
        UNIX_EPOCH + Duration::from_millis(ms as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(ms.unsigned_abs())
    };
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_modified(time)
}

/// Convert a relative `Path` into the `/`-separated form stored in records.
pub fn rel_path_string(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Remove a file or directory tree, ignoring a missing target.
pub fn remove_all(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
