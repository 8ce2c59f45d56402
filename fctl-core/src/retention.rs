//! Retention: bound the number of deployment directories and artifacts on disk.
//!
//! Deployment directories under `~/.facets/<environment>/` are ordered by their
//! `.fctl-created` marker (directories without one sort first, by name). Artifacts
//! in `~/.facets/` named `<uuid>.zip` are ordered by name. The newest
//! [`DEFAULT_KEEP`] of each survive; the current deployment and current artifact
//! always survive.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::archive;
use crate::error::{io_err, WorkspaceError};
use crate::types::{DeploymentId, EnvironmentId};
use crate::workspace::{self, CREATED_MARKER};

/// Deployment directories and artifacts kept per prune.
pub const DEFAULT_KEEP: usize = 10;

/// Entries a prune must never remove.
#[derive(Debug, Clone, Copy, Default)]
pub struct Protected<'a> {
    pub deployment: Option<&'a DeploymentId>,
    pub artifact: Option<&'a Path>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed_deployments: Vec<DeploymentId>,
    pub removed_artifacts: Vec<PathBuf>,
    /// Deletions that failed; logged, never fatal.
    pub failures: usize,
}

/// Remove all but the newest `keep` deployments of `env` and artifacts in the base dir.
pub fn prune_at(
    home: &Path,
    env: &EnvironmentId,
    protected: Protected<'_>,
    keep: usize,
) -> Result<PruneReport, WorkspaceError> {
    let mut report = PruneReport::default();
    prune_deployments(home, env, protected.deployment, keep, &mut report)?;
    prune_artifacts(home, protected.artifact, keep, &mut report)?;
    Ok(report)
}

/// `prune_at` convenience wrapper.
pub fn prune(
    env: &EnvironmentId,
    protected: Protected<'_>,
    keep: usize,
) -> Result<PruneReport, WorkspaceError> {
    prune_at(&workspace::home()?, env, protected, keep)
}

/// Creation time recorded in `dir`'s marker, if readable.
pub fn created_at(dir: &Path) -> Option<DateTime<Utc>> {
    let raw = fs::read_to_string(dir.join(CREATED_MARKER)).ok()?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn prune_deployments(
    home: &Path,
    env: &EnvironmentId,
    current: Option<&DeploymentId>,
    keep: usize,
    report: &mut PruneReport,
) -> Result<(), WorkspaceError> {
    let env_dir = workspace::env_dir_at(home, env);
    let Some(entries) = read_dir_if_exists(&env_dir)? else {
        return Ok(());
    };

    // Oldest first: unmarked, then by marker time, ties broken by name.
    let mut deployments: Vec<(Option<DateTime<Utc>>, String)> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            (created_at(&e.path()), name)
        })
        .collect();
    deployments.sort();

    let excess = deployments.len().saturating_sub(keep);
    for (_, name) in deployments.into_iter().take(excess) {
        let id = DeploymentId::from(name);
        if current == Some(&id) {
            continue;
        }
        let dir = env_dir.join(&id.0);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!("removed old deployment {}", dir.display());
                report.removed_deployments.push(id);
            }
            Err(err) => {
                tracing::warn!("could not remove {}: {err}", dir.display());
                report.failures += 1;
            }
        }
    }
    Ok(())
}

fn prune_artifacts(
    home: &Path,
    current: Option<&Path>,
    keep: usize,
    report: &mut PruneReport,
) -> Result<(), WorkspaceError> {
    let base = workspace::base_dir_at(home);
    let Some(entries) = read_dir_if_exists(&base)? else {
        return Ok(());
    };
    let current_name = current.and_then(|p| p.file_name()).map(|n| n.to_os_string());

    let mut artifacts: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| archive::is_retained_artifact(&e.file_name().to_string_lossy()))
        .map(|e| e.path())
        .collect();
    artifacts.sort();

    let excess = artifacts.len().saturating_sub(keep);
    for path in artifacts.into_iter().take(excess) {
        if current_name.as_deref() == path.file_name() {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => report.removed_artifacts.push(path),
            Err(err) => {
                tracing::warn!("could not remove {}: {err}", path.display());
                report.failures += 1;
            }
        }
    }
    Ok(())
}

fn read_dir_if_exists(dir: &Path) -> Result<Option<fs::ReadDir>, WorkspaceError> {
    match fs::read_dir(dir) {
        Ok(entries) => Ok(Some(entries)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(io_err(dir, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn env() -> EnvironmentId {
        EnvironmentId::from("env-1")
    }

    fn make_deployment(home: &Path, name: &str, created: Option<DateTime<Utc>>) {
        let dir = workspace::deployment_dir_at(home, &env(), &DeploymentId::from(name));
        fs::create_dir_all(&dir).unwrap();
        if let Some(t) = created {
            fs::write(dir.join(CREATED_MARKER), t.to_rfc3339()).unwrap();
        }
    }

    fn remaining(home: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(workspace::env_dir_at(home, &env()))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn keeps_newest_by_marker_not_name() {
        let home = TempDir::new().expect("tempdir");
        let base = Utc::now() - Duration::hours(1);
        // Names sort opposite to creation order.
        for i in 0..12 {
            make_deployment(home.path(), &format!("d{:02}", 11 - i), Some(base + Duration::minutes(i)));
        }

        let report = prune_at(home.path(), &env(), Protected::default(), 10).unwrap();
        assert_eq!(report.removed_deployments.len(), 2);
        let left = remaining(home.path());
        assert!(!left.contains(&"d11".to_string()));
        assert!(!left.contains(&"d10".to_string()));
        assert!(left.contains(&"d00".to_string()));
    }

    #[test]
    fn unmarked_directories_go_first() {
        let home = TempDir::new().expect("tempdir");
        make_deployment(home.path(), "zz-legacy", None);
        make_deployment(home.path(), "aa-new", Some(Utc::now()));

        prune_at(home.path(), &env(), Protected::default(), 1).unwrap();
        assert_eq!(remaining(home.path()), vec!["aa-new".to_string()]);
    }

    #[test]
    fn current_deployment_survives_even_when_oldest() {
        let home = TempDir::new().expect("tempdir");
        let base = Utc::now() - Duration::hours(1);
        for i in 0..3 {
            make_deployment(home.path(), &format!("d{i}"), Some(base + Duration::minutes(i)));
        }
        let current = DeploymentId::from("d0");
        let protected = Protected {
            deployment: Some(&current),
            artifact: None,
        };
        let report = prune_at(home.path(), &env(), protected, 1).unwrap();
        assert_eq!(report.removed_deployments, vec![DeploymentId::from("d1")]);
        assert_eq!(remaining(home.path()), vec!["d0".to_string(), "d2".to_string()]);
    }

    #[test]
    fn artifacts_pruned_by_name_and_foreign_zips_untouched() {
        let home = TempDir::new().expect("tempdir");
        let base = workspace::base_dir_at(home.path());
        fs::create_dir_all(&base).unwrap();
        let names: Vec<String> = (0..4)
            .map(|i| format!("0000000{i}-aaaa-bbbb-cccc-dddddddddddd.zip"))
            .collect();
        for n in &names {
            fs::write(base.join(n), "z").unwrap();
        }
        fs::write(base.join("notes.zip"), "z").unwrap();

        let current = base.join(&names[0]);
        let protected = Protected {
            deployment: None,
            artifact: Some(&current),
        };
        let report = prune_at(home.path(), &env(), protected, 2).unwrap();

        assert_eq!(report.removed_artifacts, vec![base.join(&names[1])]);
        assert!(base.join(&names[0]).exists());
        assert!(base.join("notes.zip").exists());
    }

    #[test]
    fn missing_directories_are_not_an_error() {
        let home = TempDir::new().expect("tempdir");
        let report = prune_at(home.path(), &env(), Protected::default(), DEFAULT_KEEP).unwrap();
        assert_eq!(report, PruneReport::default());
    }
}
