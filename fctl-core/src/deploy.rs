//! Apply, plan or destroy an exported artifact against its local workspace.
//!
//! The flow is identical for the three actions apart from where state comes from
//! and what happens after the tool succeeds:
//!
//! 1. resolve environment + deployment from the artifact
//! 2. prune old deployments and artifacts (current ones are protected)
//! 3. materialize the workspace (carry-forward, differ-gated re-extraction)
//! 4. optionally lift `prevent_destroy` on freshly extracted files
//! 5. place explicit or latest state, or write `backend.tf.json`
//! 6. init, select the environment workspace, run the action
//! 7. after apply: release metadata; after apply/destroy: persist the latest snapshot

use std::path::{Path, PathBuf};

use crate::backend::BackendConfig;
use crate::context;
use crate::error::WorkspaceError;
use crate::provisioner::{InitMode, Provisioner, RunOutcome};
use crate::release;
use crate::retention::{self, Protected, PruneReport, DEFAULT_KEEP};
use crate::types::{DeployAction, DeploymentId, EnvironmentId};
use crate::workspace::{self, MaterializeRequest, Materialized, StateChooser, Workspace};

/// Rewrites applied to a freshly extracted configuration tree.
pub trait ConfigRewriter {
    /// Set `prevent_destroy = false` on every managed resource under `root`.
    /// Returns the number of files changed.
    fn allow_destroy(&self, root: &Path) -> Result<usize, WorkspaceError>;
}

/// Everything one apply/plan/destroy invocation needs.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub artifact: PathBuf,
    pub action: DeployAction,
    /// Resource address passed as `-target`.
    pub target: Option<String>,
    pub backend: Option<BackendConfig>,
    /// Explicit state file; ignored when a backend is configured.
    pub state_file: Option<PathBuf>,
    pub allow_destroy: bool,
    pub retention: usize,
}

impl DeployRequest {
    pub fn new(artifact: impl Into<PathBuf>, action: DeployAction) -> Self {
        Self {
            artifact: artifact.into(),
            action,
            target: None,
            backend: None,
            state_file: None,
            allow_destroy: false,
            retention: DEFAULT_KEEP,
        }
    }
}

/// How the workspace state was seeded before the tool ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSource {
    /// Whatever materialize carried forward (or the state already present).
    Workspace,
    Explicit(PathBuf),
    Latest(PathBuf),
    Backend,
}

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub environment: EnvironmentId,
    pub deployment: DeploymentId,
    pub workspace: Workspace,
    pub materialized: Materialized,
    pub state: StateSource,
    pub run: RunOutcome,
    pub pruned: PruneReport,
    pub release_metadata: Option<PathBuf>,
    pub latest_state: Option<PathBuf>,
}

/// Seams the deploy flow drives.
pub struct Collaborators<'a> {
    pub provisioner: &'a dyn Provisioner,
    pub chooser: &'a mut dyn StateChooser,
    pub rewriter: &'a dyn ConfigRewriter,
}

/// Run one deploy action with an explicit home.
pub fn run_at(
    home: &Path,
    req: &DeployRequest,
    seams: Collaborators<'_>,
) -> Result<DeployOutcome, WorkspaceError> {
    let (environment, deployment) = context::resolve_artifact(&req.artifact)?;
    tracing::info!("environment {environment}, deployment {deployment}");

    let pruned = retention::prune_at(
        home,
        &environment,
        Protected {
            deployment: Some(&deployment),
            artifact: Some(&req.artifact),
        },
        req.retention,
    )?;

    let (ws, materialized) = workspace::materialize_at(
        home,
        &MaterializeRequest {
            environment: &environment,
            deployment: &deployment,
            artifact: &req.artifact,
            backend_configured: req.backend.is_some(),
        },
        seams.chooser,
    )?;

    if req.allow_destroy && materialized.extracted() {
        let changed = seams.rewriter.allow_destroy(&ws.root)?;
        tracing::info!("lifted prevent_destroy in {changed} file(s)");
    }

    let state = place_state(home, req, &ws)?;

    let provisioner = seams.provisioner;
    provisioner.init(&ws.root, InitMode::Default)?;
    provisioner.select_or_create_workspace(&ws.root, &environment.0)?;
    let run = provisioner.run(&ws.root, req.action, req.target.as_deref())?;

    let release_metadata = match run {
        RunOutcome::Applied => record_release_metadata(provisioner, &ws),
        _ => None,
    };

    let latest_state = match (run, &req.backend) {
        (RunOutcome::Applied | RunOutcome::Destroyed, None) => {
            match workspace::persist_latest_state_at(home, &environment, &deployment) {
                Ok(path) => Some(path),
                Err(err) => {
                    tracing::warn!("could not save latest state for {environment}: {err}");
                    None
                }
            }
        }
        _ => None,
    };

    Ok(DeployOutcome {
        environment,
        deployment,
        workspace: ws,
        materialized,
        state,
        run,
        pruned,
        release_metadata,
        latest_state,
    })
}

/// `run_at` convenience wrapper.
pub fn run(req: &DeployRequest, seams: Collaborators<'_>) -> Result<DeployOutcome, WorkspaceError> {
    run_at(&workspace::home()?, req, seams)
}

fn place_state(
    home: &Path,
    req: &DeployRequest,
    ws: &Workspace,
) -> Result<StateSource, WorkspaceError> {
    if let Some(backend) = &req.backend {
        backend.write_to(&ws.root)?;
        return Ok(StateSource::Backend);
    }
    if let Some(explicit) = &req.state_file {
        workspace::copy_file_atomic(explicit, &ws.state_path)?;
        return Ok(StateSource::Explicit(explicit.clone()));
    }
    // A plan without any state of its own previews against the environment's latest.
    if req.action == DeployAction::Plan && !ws.state_path.exists() {
        if let Some(latest) = workspace::find_latest_state_at(home, &ws.environment) {
            workspace::copy_file_atomic(&latest, &ws.state_path)?;
            return Ok(StateSource::Latest(latest));
        }
    }
    Ok(StateSource::Workspace)
}

fn record_release_metadata(provisioner: &dyn Provisioner, ws: &Workspace) -> Option<PathBuf> {
    let written = provisioner
        .show_state(&ws.root)
        .and_then(|state| release::write(&ws.dir, &release::collect(&state)));
    match written {
        Ok(path) => path,
        Err(err) => {
            tracing::warn!("could not generate release metadata: {err}");
            None
        }
    }
}
