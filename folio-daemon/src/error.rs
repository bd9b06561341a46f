use std::path::PathBuf;

use thiserror::Error;

use folio_build::BuildError;
use folio_core::ConfigError;

/// Error surface of the daemon runtime.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },

    #[error("signal handler failed: {0}")]
    Signal(String),
}

impl DaemonError {
    /// `true` unless the daemon stopped because of its own configuration.
    pub fn is_systemic(&self) -> bool {
        match self {
            DaemonError::Config(_) => false,
            DaemonError::Build(err) => err.is_systemic(),
            _ => true,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
