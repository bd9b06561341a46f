//! Error types for folio-core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by identifier handling.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The string does not follow `YYYY-MM-DD_HH-MM-SS.ffffff__NNNN`, or
    /// the embedded timestamp is not a real calendar time.
    #[error("malformed unique id '{value}': {reason}")]
    MalformedId { value: String, reason: &'static str },
}

/// Errors raised by [`crate::lock::NamedLock`].
#[derive(Debug, Error)]
pub enum LockError {
    /// The bounded wait elapsed while another owner held the lease.
    #[error("timed out after {waited:?} waiting for lock '{name}'")]
    Timeout { name: String, waited: Duration },

    /// A renewal found the lease owned by someone else.
    #[error("lock '{name}' is no longer held by this process")]
    Lost { name: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("lease metadata JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while loading or overriding [`crate::Settings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with the file path.
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A value failed validation or could not be converted.
    #[error("invalid setting '{key}': {message}")]
    Invalid { key: String, message: String },
}

pub(crate) fn lock_io(path: impl Into<PathBuf>, source: std::io::Error) -> LockError {
    LockError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.into(),
    }
}
