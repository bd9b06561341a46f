//! Error types for folio-commit.

use std::path::PathBuf;

use thiserror::Error;

use folio_core::{CoreError, LockError};

/// All errors that can arise while queueing or committing files.
#[derive(Debug, Error)]
pub enum CommitError {
    /// A queue entry could not be created, written or renamed.
    #[error("commit queue I/O error at {path}: {source}")]
    QueueIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A finished queue entry does not deserialize. Never treated as stale.
    #[error("corrupt commit queue entry {path}: {source}")]
    CorruptQueueEntry {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("refusing path with parent-directory segments: {path}")]
    PathTraversal { path: PathBuf },

    #[error("refusing relative target path: {path}")]
    RelativePath { path: PathBuf },

    /// Target exists as a directory or symlink.
    #[error("refusing to replace directory or symlink: {path}")]
    InvalidTarget { path: PathBuf },

    /// A control file holds something other than a unique id.
    #[error("control file {path} is invalid: {source}")]
    ControlFile {
        path: PathBuf,
        #[source]
        source: CoreError,
    },

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("queue entry JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CommitError {
    /// `true` when the output lock could not be obtained in time.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, CommitError::Lock(LockError::Timeout { .. }))
    }

    /// `true` for errors caused by the caller's input rather than the system.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            CommitError::PathTraversal { .. }
                | CommitError::RelativePath { .. }
                | CommitError::InvalidTarget { .. }
        )
    }
}

/// Convenience constructor for [`CommitError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CommitError {
    CommitError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`CommitError::QueueIo`].
pub(crate) fn queue_err(path: impl Into<PathBuf>, source: std::io::Error) -> CommitError {
    CommitError::QueueIo {
        path: path.into(),
        source,
    }
}
