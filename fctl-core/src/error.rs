//! Error types for fctl-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::DeploymentId;

/// All errors raised by local workspace, artifact and provisioning operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `dirs::home_dir()` returned `None`; the `~/.facets` base cannot be located.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The artifact could not be opened or read as a zip archive.
    #[error("corrupt or unreadable archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("invalid artifact name '{name}': expected <deployment-id>.zip or terraform-export-<env>-<deployment>-<timestamp>.zip")]
    InvalidArtifactName { name: String },

    /// `deploymentcontext.json` missing from the artifact or lacking `cluster.id`.
    #[error("export context missing or invalid in {path}: {reason}")]
    MissingExportContext { path: PathBuf, reason: String },

    /// The requested prior snapshot could not be carried into the new Workspace.
    #[error("cannot carry state forward from deployment {deployment}: no readable state at {path}")]
    StateCarryForward {
        deployment: DeploymentId,
        path: PathBuf,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// The provisioning tool could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The provisioning tool exited unsuccessfully.
    #[error("`{command}` exited with {}", exit_label(.code))]
    Provision { command: String, code: Option<i32> },

    #[error("state selection aborted: {0}")]
    Prompt(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

/// Convenience constructor for [`WorkspaceError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WorkspaceError {
    WorkspaceError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn zip_err(path: impl Into<PathBuf>, source: zip::result::ZipError) -> WorkspaceError {
    WorkspaceError::Archive {
        path: path.into(),
        source,
    }
}
