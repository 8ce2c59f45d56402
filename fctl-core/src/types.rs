//! Domain types shared by every fctl crate.
//!
//! Identifiers are newtypes over `String`; filesystem locations are always `PathBuf`.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque identifier of a remote environment (a "cluster" on the control plane).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvironmentId(pub String);

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EnvironmentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EnvironmentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of one export/apply cycle inside an environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentId(pub String);

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DeploymentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeploymentId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Name of a project (a "stack" on the control plane) grouping environments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectName(pub String);

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProjectName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Local state of one environment's export, as driven by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    #[default]
    Pending,
    Triggering,
    Waiting,
    Downloading,
    Extracting,
    Cleaning,
    Complete,
    Failed,
}

impl ExportStatus {
    /// `Complete` and `Failed` are never left once entered.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExportStatus::Complete | ExportStatus::Failed)
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(self, next: ExportStatus) -> bool {
        use ExportStatus::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        match (self, next) {
            (Pending, Triggering) | (Pending, Waiting) => true,
            (Triggering, Waiting) => true,
            (Waiting, Waiting) | (Waiting, Downloading) => true,
            (Downloading, Downloading) | (Downloading, Extracting) => true,
            (Extracting, Cleaning) => true,
            (Cleaning, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportStatus::Pending => write!(f, "pending"),
            ExportStatus::Triggering => write!(f, "triggering"),
            ExportStatus::Waiting => write!(f, "waiting"),
            ExportStatus::Downloading => write!(f, "downloading"),
            ExportStatus::Extracting => write!(f, "extracting"),
            ExportStatus::Cleaning => write!(f, "cleaning"),
            ExportStatus::Complete => write!(f, "complete"),
            ExportStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a remote export job as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteJobStatus {
    Queued,
    InProgress,
    Succeeded,
    Failed { detail: Option<String> },
}

impl RemoteJobStatus {
    /// Map the control plane's upper-case status strings.
    pub fn from_remote(status: &str, detail: Option<String>) -> Self {
        match status {
            "SUCCEEDED" => RemoteJobStatus::Succeeded,
            "FAILED" | "FAULT" => RemoteJobStatus::Failed { detail },
            "IN_PROGRESS" => RemoteJobStatus::InProgress,
            _ => RemoteJobStatus::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RemoteJobStatus::Succeeded | RemoteJobStatus::Failed { .. })
    }
}

impl fmt::Display for RemoteJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteJobStatus::Queued => write!(f, "QUEUED"),
            RemoteJobStatus::InProgress => write!(f, "IN_PROGRESS"),
            RemoteJobStatus::Succeeded => write!(f, "SUCCEEDED"),
            RemoteJobStatus::Failed { .. } => write!(f, "FAILED"),
        }
    }
}

/// What the provisioning tool is asked to do against a Workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeployAction {
    Apply,
    Plan,
    Destroy,
}

impl fmt::Display for DeployAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployAction::Apply => write!(f, "apply"),
            DeployAction::Plan => write!(f, "plan"),
            DeployAction::Destroy => write!(f, "destroy"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// An environment as listed by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub name: String,
}

impl Environment {
    pub fn new(id: impl Into<EnvironmentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One remote export request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    pub environment: EnvironmentId,
    pub id: DeploymentId,
    pub status: RemoteJobStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
