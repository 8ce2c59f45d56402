//! fctl core library — domain types, artifacts, workspaces, errors.
//!
//! - [`types`] — newtypes, export and remote job states
//! - [`error`] — [`WorkspaceError`]
//! - [`archive`] / [`context`] — artifact names, zip I/O, export context
//! - [`differ`] — content comparison of an artifact against a directory
//! - [`workspace`] / [`retention`] — on-disk layout, state carry-forward, pruning
//! - [`settings`] / [`credentials`] / [`backend`] — local configuration
//! - [`provisioner`] / [`deploy`] / [`release`] — running the provisioning tool

pub mod archive;
pub mod backend;
pub mod context;
pub mod credentials;
pub mod deploy;
pub mod differ;
mod duration;
pub mod error;
pub mod provisioner;
pub mod release;
pub mod retention;
pub mod settings;
pub mod types;
pub mod workspace;

pub use backend::{BackendConfig, BackendKind};
pub use deploy::{Collaborators, ConfigRewriter, DeployOutcome, DeployRequest, StateSource};
pub use duration::format_duration;
pub use error::WorkspaceError;
pub use provisioner::{InitMode, Provisioner, RunOutcome, TerraformCli};
pub use settings::Settings;
pub use types::{
    DeployAction, DeploymentId, Environment, EnvironmentId, ExportJob, ExportStatus, ProjectName,
    RemoteJobStatus,
};
pub use workspace::{StateChoice, StateChooser, Workspace};
