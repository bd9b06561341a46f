//! Size-based rotation of the commit audit log.
//!
//! `commit.log` grows by one line per committed item. Once it reaches
//! 10 MiB it is shifted to `commit.log.1`, older copies move up by one and
//! at most five are kept. `changes.log` is never rotated: the build loop
//! reads it to match changed paths against trigger patterns.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use folio_core::paths;

pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` if it is at least `max_bytes` long.
///
/// `<name>.<max_files>` is dropped, `<name>.<n>` becomes `<name>.<n+1>`,
/// `<name>` becomes `<name>.1` and an empty `<name>` is created.
///
/// Returns `true` if rotation occurred. A missing log is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;

    // Writers append with create(true); the empty file only keeps `tail -f` happy.
    fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(log_path)?;
    Ok(true)
}

/// Rotate the audit log under `work_dir`. Failures are logged.
pub fn rotate_logs(work_dir: &Path) {
    let log_path = paths::commit_log_path(work_dir);
    match rotate_if_needed(&log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(path = %log_path.display(), "audit log rotated"),
        Ok(false) => {}
        Err(err) => tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed"),
    }
}

/// `commit.log` → `commit.log.<n>`.
pub fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("commit.log");
    base.with_file_name(format!("{name}.{n}"))
}
