//! Error types for folio-build.

use std::path::PathBuf;

use thiserror::Error;

use folio_commit::CommitError;
use folio_core::{ConfigError, LockError, UniqueId};
use folio_release::ReleaseError;

/// Coarse classification used to separate noisy user-input errors from
/// failures of the export/build system itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad configuration or a caller-side refusal. Safe to report as-is.
    UserInput,
    /// Coordination failures such as lock timeouts. Retrying later may work.
    Transient,
    /// The system cannot make progress without operator attention.
    Systemic,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unknown builder '{id}' (registered: {})", .known.join(", "))]
    UnknownBuilder { id: String, known: Vec<String> },

    #[error("builder '{builder}' is misconfigured: {message}")]
    BuilderConfig { builder: String, message: String },

    #[error("invalid trigger pattern '{pattern}': {source}")]
    InvalidTrigger {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("commit error: {0}")]
    Commit(#[from] CommitError),

    #[error("release error: {0}")]
    Release(#[from] ReleaseError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("hook '{hook}' aborted {stage}: {reason}")]
    HookAborted {
        hook: String,
        stage: &'static str,
        reason: String,
    },

    #[error("builder '{builder}' failed: {message}")]
    BuilderFailed { builder: String, message: String },

    #[error("publishing release {id} could not be confirmed")]
    PublishUnconfirmed { id: UniqueId },

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The build failed and no release with a finished task could be made
    /// current.
    #[error("system has no servable release (build failed: {cause})")]
    NoServableRelease { cause: String },
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Config(_)
            | BuildError::UnknownBuilder { .. }
            | BuildError::BuilderConfig { .. }
            | BuildError::InvalidTrigger { .. }
            | BuildError::HookAborted { .. } => ErrorKind::UserInput,
            BuildError::Lock(LockError::Timeout { .. } | LockError::Lost { .. }) => {
                ErrorKind::Transient
            }
            BuildError::Commit(err) if err.is_invalid_input() => ErrorKind::UserInput,
            BuildError::Commit(err) if err.is_lock_timeout() => ErrorKind::Transient,
            _ => ErrorKind::Systemic,
        }
    }

    /// `true` for failures of the export/build system itself.
    pub fn is_systemic(&self) -> bool {
        self.kind() == ErrorKind::Systemic
    }
}

/// Convenience constructor for [`BuildError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> BuildError {
    BuildError::Io {
        path: path.into(),
        source,
    }
}
