//! Error types for fctl-sanitize.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a whole sanitize or consolidation run.
///
/// Problems confined to one file are reported as [`SanitizationWarning`]s instead.
#[derive(Debug, Error)]
pub enum SanitizeError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a directory")]
    NotADirectory { path: PathBuf },
}

/// Convenience constructor for [`SanitizeError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SanitizeError {
    SanitizeError::Io {
        path: path.into(),
        source,
    }
}

/// One file the engine could not rewrite; the file was left as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizationWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl SanitizationWarning {
    pub(crate) fn new(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        let warning = Self {
            path: path.into(),
            reason: reason.to_string(),
        };
        tracing::warn!("skipping {}: {}", warning.path.display(), warning.reason);
        warning
    }
}

impl fmt::Display for SanitizationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}
