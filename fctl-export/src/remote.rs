//! The remote job seam: everything fctl asks of the control plane.
//!
//! Calls block; async callers go through `spawn_blocking`.

use std::io::Read;
use std::time::Duration;

use chrono::{DateTime, Utc};

use fctl_core::{
    DeploymentId, Environment, EnvironmentId, ExportJob, ProjectName, RemoteJobStatus,
};

use crate::error::RemoteJobError;

/// How many succeeded exports feed the duration estimate.
pub const ESTIMATE_WINDOW: usize = 10;

/// Name given to environments the control plane lists without one.
pub const UNNAMED_ENVIRONMENT: &str = "unnamed";

/// One export job as listed for an environment, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteExport {
    pub id: DeploymentId,
    pub status: RemoteJobStatus,
    pub created_on: Option<DateTime<Utc>>,
    pub time_taken_secs: Option<u64>,
}

impl RemoteExport {
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            RemoteJobStatus::Queued | RemoteJobStatus::InProgress
        )
    }
}

/// A streaming artifact body.
pub struct Download {
    /// `Content-Length`, when the server sent one.
    pub length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Control plane operations used by the export commands.
pub trait RemoteJobApi: Send + Sync {
    /// Names of every project (stack) visible to the profile.
    fn projects(&self) -> Result<Vec<ProjectName>, RemoteJobError>;

    fn environments(&self, project: &ProjectName) -> Result<Vec<Environment>, RemoteJobError>;

    /// Export jobs of one environment, newest first.
    fn exports(&self, env: &EnvironmentId) -> Result<Vec<RemoteExport>, RemoteJobError>;

    /// Start a new export job.
    fn trigger(&self, env: &EnvironmentId) -> Result<ExportJob, RemoteJobError>;

    fn status(
        &self,
        env: &EnvironmentId,
        job: &DeploymentId,
    ) -> Result<RemoteJobStatus, RemoteJobError>;

    fn download(&self, env: &EnvironmentId, job: &DeploymentId)
        -> Result<Download, RemoteJobError>;
}

/// The first queued or running export, which a new export should wait on.
pub fn find_active(exports: &[RemoteExport]) -> Option<&RemoteExport> {
    exports.iter().find(|e| e.is_active())
}

/// Average duration of the most recent succeeded exports that recorded one.
pub fn estimate(exports: &[RemoteExport]) -> Option<Duration> {
    let samples: Vec<u64> = exports
        .iter()
        .filter(|e| e.status == RemoteJobStatus::Succeeded)
        .filter_map(|e| e.time_taken_secs)
        .take(ESTIMATE_WINDOW)
        .collect();
    if samples.is_empty() {
        return None;
    }
    let total: u64 = samples.iter().sum();
    Some(Duration::from_secs(total / samples.len() as u64))
}

/// Fail with `ProjectNotFound` unless the project is listed.
pub fn ensure_project(api: &dyn RemoteJobApi, project: &ProjectName) -> Result<(), RemoteJobError> {
    if api.projects()?.iter().any(|p| p == project) {
        Ok(())
    } else {
        Err(RemoteJobError::ProjectNotFound(project.to_string()))
    }
}

/// Look an environment up by name within a project.
pub fn resolve_environment(
    api: &dyn RemoteJobApi,
    project: &ProjectName,
    name: &str,
) -> Result<Environment, RemoteJobError> {
    ensure_project(api, project)?;
    api.environments(project)?
        .into_iter()
        .find(|env| env.name == name)
        .ok_or_else(|| RemoteJobError::EnvironmentNotFound(format!("{name} in project {project}")))
}
