//! Project-level steps after every environment of an export-all has finished.
//!
//! Each step runs over the environments that completed. Failures are logged
//! and collected as warnings; they never undo the exports themselves.

use std::fs;
use std::path::{Path, PathBuf};

use fctl_core::{InitMode, Provisioner};
use fctl_sanitize::{consolidate, ConsolidationReport, EnvTree};

use crate::error::{io_err, ExportError};

/// Subdirectory holding the configuration inside a downloaded export.
pub const EXPORT_ROOT: &str = "tfexport";
/// State shipped with an export, pushed into the local workspace then removed.
pub const DOWNLOADED_STATE: &str = "downloaded-terraform.tfstate";

/// What post-processing did.
#[derive(Debug, Default)]
pub struct PostProcessReport {
    pub flattened: Vec<String>,
    pub consolidation: Option<ConsolidationReport>,
    /// Environments whose downloaded state was pushed.
    pub state_pushed: Vec<String>,
    pub warnings: Vec<String>,
}

impl PostProcessReport {
    fn warn(&mut self, env: &str, step: &str, err: impl std::fmt::Display) {
        tracing::warn!(env = %env, step = %step, error = %err, "post-processing step failed");
        self.warnings.push(format!("{env}: {step}: {err}"));
    }
}

/// Flatten, consolidate and seed local state for `envs` under `project_dir`.
pub fn post_process(
    project_dir: &Path,
    envs: &[EnvTree],
    provisioner: &dyn Provisioner,
) -> PostProcessReport {
    let mut report = PostProcessReport::default();
    if envs.is_empty() {
        tracing::warn!(project = %project_dir.display(), "no successful exports to post-process");
        return report;
    }

    for env in envs {
        match flatten(&env.dir) {
            Ok(true) => report.flattened.push(env.name.clone()),
            Ok(false) => {}
            Err(err) => report.warn(&env.name, "restructure", err),
        }
    }

    match consolidate(project_dir, envs) {
        Ok(consolidation) => {
            for (name, reason) in &consolidation.skipped {
                report.warnings.push(format!("{name}: consolidate: {reason}"));
            }
            report.consolidation = Some(consolidation);
        }
        Err(err) => report.warn("*", "consolidate", err),
    }

    for env in envs {
        match push_downloaded_state(&env.dir, provisioner) {
            Ok(true) => report.state_pushed.push(env.name.clone()),
            Ok(false) => {}
            Err(err) => report.warn(&env.name, "initialize state", err),
        }
    }
    report
}

// ---------------------------------------------------------------------------
// 1. Flatten
// ---------------------------------------------------------------------------

/// Move the contents of `<env>/tfexport/` into `<env>/`. `false` when there is nothing to move.
pub fn flatten(env_dir: &Path) -> Result<bool, ExportError> {
    let export_root = env_dir.join(EXPORT_ROOT);
    if !export_root.is_dir() {
        return Ok(false);
    }
    merge_into(&export_root, env_dir)?;
    fs::remove_dir_all(&export_root).map_err(|e| io_err(&export_root, e))?;
    Ok(true)
}

/// Move every entry of `from` into `to`, merging directories and replacing files.
fn merge_into(from: &Path, to: &Path) -> Result<(), ExportError> {
    fs::create_dir_all(to).map_err(|e| io_err(to, e))?;
    let entries = fs::read_dir(from).map_err(|e| io_err(from, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(from, e))?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        let is_dir = entry.file_type().map_err(|e| io_err(&source, e))?.is_dir();

        if is_dir && target.is_dir() {
            merge_into(&source, &target)?;
            continue;
        }
        if !is_dir && target.is_dir() {
            fs::remove_dir_all(&target).map_err(|e| io_err(&target, e))?;
        }
        if is_dir && target.exists() {
            fs::remove_file(&target).map_err(|e| io_err(&target, e))?;
        }
        fs::rename(&source, &target).map_err(|e| io_err(&target, e))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. State
// ---------------------------------------------------------------------------

/// Init without a backend, push the downloaded state, then delete it.
pub fn push_downloaded_state(
    env_dir: &Path,
    provisioner: &dyn Provisioner,
) -> Result<bool, ExportError> {
    let state = env_dir.join(DOWNLOADED_STATE);
    if !state.is_file() {
        return Ok(false);
    }
    let absolute: PathBuf = fs::canonicalize(&state).map_err(|e| io_err(&state, e))?;

    provisioner.init(env_dir, InitMode::NoBackend)?;
    provisioner.state_push(env_dir, &absolute)?;
    fs::remove_file(&state).map_err(|e| io_err(&state, e))?;
    tracing::info!(env = %env_dir.display(), "pushed downloaded state");
    Ok(true)
}
