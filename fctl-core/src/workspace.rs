//! Workspace manager: on-disk layout per (environment, deployment).
//!
//! # Storage layout
//!
//! ```text
//! ~/.facets/
//!   <environment>/
//!     tf.tfstate                 (latest snapshot, overwritten after apply/destroy)
//!     <deployment>/
//!       .fctl-created            (creation timestamp, RFC 3339)
//!       release-metadata.json    (after apply, when present in state)
//!       tfexport/                (workspace root handed to the provisioning tool)
//!         terraform.tfstate.d/<environment>/terraform.tfstate
//! ```
//!
//! # API pattern
//!
//! Every function that touches the home directory has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;

use crate::archive;
use crate::differ;
use crate::error::{io_err, WorkspaceError};
use crate::types::{DeploymentId, EnvironmentId};

pub const BASE_DIR: &str = ".facets";
pub const WORKSPACE_ROOT: &str = "tfexport";
pub const LATEST_STATE: &str = "tf.tfstate";
/// Older releases wrote the environment snapshot under this name.
pub const LEGACY_LATEST_STATE: &str = "latest.tfstate";
pub const CREATED_MARKER: &str = ".fctl-created";

// ---------------------------------------------------------------------------
// 1. Path helpers (pure, no I/O)
// ---------------------------------------------------------------------------

/// `<home>/.facets/`
pub fn base_dir_at(home: &Path) -> PathBuf {
    home.join(BASE_DIR)
}

/// `<home>/.facets/<environment>/`
pub fn env_dir_at(home: &Path, env: &EnvironmentId) -> PathBuf {
    base_dir_at(home).join(&env.0)
}

/// `<home>/.facets/<environment>/<deployment>/`
pub fn deployment_dir_at(home: &Path, env: &EnvironmentId, deployment: &DeploymentId) -> PathBuf {
    env_dir_at(home, env).join(&deployment.0)
}

/// `<home>/.facets/<environment>/<deployment>/tfexport/`
pub fn workspace_root_at(home: &Path, env: &EnvironmentId, deployment: &DeploymentId) -> PathBuf {
    deployment_dir_at(home, env, deployment).join(WORKSPACE_ROOT)
}

/// Deployment-scoped snapshot inside a workspace root.
pub fn state_path_in(root: &Path, env: &EnvironmentId) -> PathBuf {
    root.join("terraform.tfstate.d")
        .join(&env.0)
        .join("terraform.tfstate")
}

/// `<home>/.facets/<environment>/<deployment>/tfexport/terraform.tfstate.d/<environment>/terraform.tfstate`
pub fn state_path_at(home: &Path, env: &EnvironmentId, deployment: &DeploymentId) -> PathBuf {
    state_path_in(&workspace_root_at(home, env, deployment), env)
}

/// `<home>/.facets/<environment>/tf.tfstate`
pub fn latest_state_path_at(home: &Path, env: &EnvironmentId) -> PathBuf {
    env_dir_at(home, env).join(LATEST_STATE)
}

/// The environment's latest snapshot, if one exists under either name.
pub fn find_latest_state_at(home: &Path, env: &EnvironmentId) -> Option<PathBuf> {
    let env_dir = env_dir_at(home, env);
    [LATEST_STATE, LEGACY_LATEST_STATE]
        .iter()
        .map(|name| env_dir.join(name))
        .find(|p| p.is_file())
}

pub fn home() -> Result<PathBuf, WorkspaceError> {
    dirs::home_dir().ok_or(WorkspaceError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// 2. Listing
// ---------------------------------------------------------------------------

/// Deployments of `env`, oldest → newest by modification time, excluding `current`.
pub fn list_deployments_at(
    home: &Path,
    env: &EnvironmentId,
    current: Option<&DeploymentId>,
) -> Result<Vec<DeploymentId>, WorkspaceError> {
    let env_dir = env_dir_at(home, env);
    if !env_dir.exists() {
        return Ok(vec![]);
    }
    let mut found: Vec<(SystemTime, DeploymentId)> = fs::read_dir(&env_dir)
        .map_err(|e| io_err(&env_dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| {
            let id = DeploymentId::from(e.file_name().to_string_lossy().into_owned());
            if current == Some(&id) {
                return None;
            }
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, id))
        })
        .collect();
    found.sort();
    Ok(found.into_iter().map(|(_, id)| id).collect())
}

/// `list_deployments_at` convenience wrapper.
pub fn list_deployments(
    env: &EnvironmentId,
    current: Option<&DeploymentId>,
) -> Result<Vec<DeploymentId>, WorkspaceError> {
    list_deployments_at(&home()?, env, current)
}

// ---------------------------------------------------------------------------
// 3. State carry-forward
// ---------------------------------------------------------------------------

/// Which snapshot seeds a newly created workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChoice {
    /// Copy the deployment-scoped snapshot of an earlier deployment.
    Deployment(DeploymentId),
    /// Copy the environment's latest snapshot.
    Latest,
    /// Start without state.
    Fresh,
}

/// Decides which prior snapshot a new workspace starts from.
///
/// `candidates` are ordered oldest → newest; `latest` is the environment snapshot, if any.
pub trait StateChooser {
    fn choose(
        &mut self,
        candidates: &[DeploymentId],
        latest: Option<&Path>,
    ) -> Result<StateChoice, WorkspaceError>;
}

/// Non-interactive chooser: the latest snapshot when present, otherwise fresh.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreferLatest;

impl StateChooser for PreferLatest {
    fn choose(
        &mut self,
        _candidates: &[DeploymentId],
        latest: Option<&Path>,
    ) -> Result<StateChoice, WorkspaceError> {
        Ok(if latest.is_some() {
            StateChoice::Latest
        } else {
            StateChoice::Fresh
        })
    }
}

/// Copy `deployment`'s snapshot into `target`, failing with a carry-forward error
/// that names the source deployment.
pub fn copy_state_from_deployment_at(
    home: &Path,
    env: &EnvironmentId,
    deployment: &DeploymentId,
    target: &Path,
) -> Result<(), WorkspaceError> {
    let source = state_path_at(home, env, deployment);
    let carry_err = || WorkspaceError::StateCarryForward {
        deployment: deployment.clone(),
        path: source.clone(),
    };
    if !source.is_file() {
        return Err(carry_err());
    }
    copy_file_atomic(&source, target).map_err(|err| {
        tracing::warn!("state copy from {} failed: {err}", source.display());
        carry_err()
    })
}

// ---------------------------------------------------------------------------
// 4. Materialize
// ---------------------------------------------------------------------------

/// A resolved workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub environment: EnvironmentId,
    pub deployment: DeploymentId,
    /// `<env>/<deployment>/`
    pub dir: PathBuf,
    /// `<env>/<deployment>/tfexport/`
    pub root: PathBuf,
    pub state_path: PathBuf,
}

impl Workspace {
    pub fn at(home: &Path, env: &EnvironmentId, deployment: &DeploymentId) -> Self {
        Self {
            environment: env.clone(),
            deployment: deployment.clone(),
            dir: deployment_dir_at(home, env, deployment),
            root: workspace_root_at(home, env, deployment),
            state_path: state_path_at(home, env, deployment),
        }
    }
}

/// Where a new workspace's state came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CarriedState {
    Deployment(DeploymentId),
    Latest(PathBuf),
    Nothing,
}

/// What `materialize_at` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    /// New workspace; the artifact was extracted.
    Created { carried: CarriedState },
    /// Existing workspace whose files no longer matched the artifact.
    Reextracted,
    /// Existing workspace already matching the artifact; nothing written.
    Unchanged,
}

impl Materialized {
    pub fn extracted(&self) -> bool {
        !matches!(self, Materialized::Unchanged)
    }
}

#[derive(Debug, Clone)]
pub struct MaterializeRequest<'a> {
    pub environment: &'a EnvironmentId,
    pub deployment: &'a DeploymentId,
    pub artifact: &'a Path,
    /// With a remote backend there is no local state to carry forward.
    pub backend_configured: bool,
}

/// Ensure the workspace for `(environment, deployment)` holds the artifact's files.
///
/// A new workspace may be seeded with a prior snapshot (chosen through `chooser`
/// when earlier deployments exist, otherwise the environment's latest snapshot).
/// An existing workspace is re-extracted only when the content differ reports a change.
pub fn materialize_at(
    home: &Path,
    req: &MaterializeRequest<'_>,
    chooser: &mut dyn StateChooser,
) -> Result<(Workspace, Materialized), WorkspaceError> {
    let ws = Workspace::at(home, req.environment, req.deployment);

    if ws.root.exists() {
        let outcome = if differ::differs(req.artifact, &ws.dir)? {
            tracing::info!("artifact changed, re-extracting into {}", ws.dir.display());
            extract_into(req.artifact, &ws)?;
            Materialized::Reextracted
        } else {
            Materialized::Unchanged
        };
        return Ok((ws, outcome));
    }

    fs::create_dir_all(&ws.dir).map_err(|e| io_err(&ws.dir, e))?;
    write_created_marker(&ws.dir)?;

    let carried = if req.backend_configured {
        CarriedState::Nothing
    } else {
        carry_forward(home, &ws, chooser)?
    };

    extract_into(req.artifact, &ws)?;
    Ok((ws, Materialized::Created { carried }))
}

/// `materialize_at` convenience wrapper.
pub fn materialize(
    req: &MaterializeRequest<'_>,
    chooser: &mut dyn StateChooser,
) -> Result<(Workspace, Materialized), WorkspaceError> {
    materialize_at(&home()?, req, chooser)
}

fn carry_forward(
    home: &Path,
    ws: &Workspace,
    chooser: &mut dyn StateChooser,
) -> Result<CarriedState, WorkspaceError> {
    let candidates = list_deployments_at(home, &ws.environment, Some(&ws.deployment))?;
    let latest = find_latest_state_at(home, &ws.environment);

    let choice = if candidates.is_empty() {
        if latest.is_some() {
            StateChoice::Latest
        } else {
            StateChoice::Fresh
        }
    } else {
        chooser.choose(&candidates, latest.as_deref())?
    };

    match choice {
        StateChoice::Deployment(source) => {
            copy_state_from_deployment_at(home, &ws.environment, &source, &ws.state_path)?;
            tracing::info!("carried state forward from deployment {source}");
            Ok(CarriedState::Deployment(source))
        }
        StateChoice::Latest => match latest {
            Some(path) => {
                copy_file_atomic(&path, &ws.state_path)?;
                Ok(CarriedState::Latest(path))
            }
            None => {
                tracing::warn!("no latest snapshot for {}, starting fresh", ws.environment);
                Ok(CarriedState::Nothing)
            }
        },
        StateChoice::Fresh => Ok(CarriedState::Nothing),
    }
}

fn extract_into(artifact: &Path, ws: &Workspace) -> Result<(), WorkspaceError> {
    archive::extract(artifact, &ws.dir)?;
    if ws.root.exists() {
        archive::fix_permissions(&ws.root)?;
    }
    Ok(())
}

fn write_created_marker(dir: &Path) -> Result<(), WorkspaceError> {
    let marker = dir.join(CREATED_MARKER);
    fs::write(&marker, Utc::now().to_rfc3339()).map_err(|e| io_err(&marker, e))
}

// ---------------------------------------------------------------------------
// 5. Persist latest
// ---------------------------------------------------------------------------

/// Overwrite the environment's latest snapshot with the deployment's state.
///
/// Called after a successful apply or destroy. Returns the latest snapshot path.
pub fn persist_latest_state_at(
    home: &Path,
    env: &EnvironmentId,
    deployment: &DeploymentId,
) -> Result<PathBuf, WorkspaceError> {
    let source = state_path_at(home, env, deployment);
    let target = latest_state_path_at(home, env);
    copy_file_atomic(&source, &target)?;
    Ok(target)
}

/// `persist_latest_state_at` convenience wrapper.
pub fn persist_latest_state(
    env: &EnvironmentId,
    deployment: &DeploymentId,
) -> Result<PathBuf, WorkspaceError> {
    persist_latest_state_at(&home()?, env, deployment)
}

/// Copy `source` over `target` via a `.tmp` sibling + rename (mode `0600`).
pub fn copy_file_atomic(source: &Path, target: &Path) -> Result<(), WorkspaceError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = target.with_file_name(format!("{name}.tmp"));
    fs::copy(source, &tmp).map_err(|e| io_err(source, e))?;
    set_file_permissions(&tmp)?;
    fs::rename(&tmp, target).map_err(|e| io_err(target, e))?;
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), WorkspaceError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), WorkspaceError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
