//! Control files under the work directory.
//!
//! Id files hold one id each and are replaced atomically (`.tmp` + rename),
//! the same way the sync hash store is saved. The audit log is append-only;
//! failing to append is logged and swallowed so it can never mask the error
//! that is being reported.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use folio_core::{paths, Audience, UniqueId};

use crate::error::{io_err, CommitError};

#[derive(Debug, Clone)]
pub struct ControlFiles {
    work_dir: PathBuf,
}

impl ControlFiles {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Last globally committed id; the epoch sentinel before the first commit.
    pub fn last_committed(&self) -> Result<UniqueId, CommitError> {
        read_id(&paths::last_committed_path(&self.work_dir))
    }

    pub fn set_last_committed(&self, id: &UniqueId) -> Result<(), CommitError> {
        write_id(&paths::last_committed_path(&self.work_dir), id)
    }

    /// Last id whose commit changed content visible to `audience`.
    pub fn last_executed(&self, audience: Audience) -> Result<UniqueId, CommitError> {
        read_id(&paths::last_executed_path(&self.work_dir, audience))
    }

    pub fn set_last_executed(&self, audience: Audience, id: &UniqueId) -> Result<(), CommitError> {
        write_id(&paths::last_executed_path(&self.work_dir, audience), id)
    }

    pub fn commit_log_path(&self) -> PathBuf {
        paths::commit_log_path(&self.work_dir)
    }

    /// Append one line to the commit audit log. Never fails.
    pub fn append_commit_log(&self, line: &str) {
        append_lines(&self.commit_log_path(), std::iter::once(line));
    }

    /// Every audit line, oldest first.
    pub fn read_commit_log(&self) -> Result<Vec<String>, CommitError> {
        let path = self.commit_log_path();
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(contents.lines().map(str::to_string).collect()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(io_err(path, err)),
        }
    }
}

fn read_id(path: &Path) -> Result<UniqueId, CommitError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(UniqueId::default()),
        Err(err) => return Err(io_err(path, err)),
    };
    contents
        .trim()
        .parse::<UniqueId>()
        .map_err(|source| CommitError::ControlFile {
            path: path.to_path_buf(),
            source,
        })
}

fn write_id(path: &Path, id: &UniqueId) -> Result<(), CommitError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{name}.tmp"));
    fs::write(&tmp, format!("{id}\n")).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| io_err(path, e))
}

/// Append `lines` to `path`, creating it (and its parents) when missing.
/// Failures are logged, never returned.
pub(crate) fn append_lines<'a>(path: &Path, lines: impl IntoIterator<Item = &'a str>) {
    let result = (|| -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut buf = String::new();
        for line in lines {
            buf.push_str(line);
            buf.push('\n');
        }
        if buf.is_empty() {
            return Ok(());
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(buf.as_bytes())
    })();
    if let Err(err) = result {
        tracing::warn!(path = %path.display(), error = %err, "failed to append to log");
    }
}
