//! Error types for fctl-export.

use std::path::PathBuf;

use thiserror::Error;

use fctl_core::WorkspaceError;
use fctl_sanitize::SanitizeError;

/// Failures talking to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteJobError {
    /// HTTP 503; reported as a single retry-later line.
    #[error("control plane is unreachable or down (HTTP 503), retry later")]
    ServiceUnavailable,

    /// The environment cannot run an export right now (not in a running state).
    #[error("{0}")]
    NotRunnable(String),

    /// The control plane refused the request (HTTP 400) with this message.
    #[error("{0}")]
    Rejected(String),

    #[error("{url} returned HTTP {status}")]
    Http { status: u16, url: String },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    /// The remote export job finished in a failed state.
    #[error("{0}")]
    JobFailed(String),

    #[error("project (stack) not found: {0}")]
    ProjectNotFound(String),

    #[error("environment not found: {0}")]
    EnvironmentNotFound(String),
}

/// Everything that can end one environment's export or the whole run.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Remote(#[from] RemoteJobError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("sanitize error: {0}")]
    Sanitize(#[from] SanitizeError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The downloaded body could not be stored.
    #[error("download to {path} failed: {reason}")]
    Transfer { path: PathBuf, reason: String },

    #[error("{task} task join failure: {reason}")]
    Join { task: String, reason: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ExportError {
    ExportError::Io {
        path: path.into(),
        source,
    }
}
