//! Error types for folio-release.

use std::path::PathBuf;

use thiserror::Error;

use folio_core::UniqueId;

#[derive(Debug, Error)]
pub enum ReleaseError {
    /// A step of creating the release directory tree failed.
    #[error("cannot create release {id} at {path}: {source}")]
    ReleaseCreation {
        id: UniqueId,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Something that publishing relies on does not hold. Indicates a race
    /// or a bug in the caller, never a user error.
    #[error("invariant violated for release {id}: {reason}")]
    InvariantViolation { id: UniqueId, reason: String },

    #[error("refusing to delete current release {id}")]
    CannotDeleteCurrentRelease { id: UniqueId },

    /// A task status file holds an unknown state.
    #[error("task file {path} holds unknown state '{value}'")]
    UnknownTaskState { path: PathBuf, value: String },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience constructor for [`ReleaseError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ReleaseError {
    ReleaseError::Io {
        path: path.into(),
        source,
    }
}
