//! `deploymentcontext.json`: the export context shipped at the artifact root.

use std::path::Path;

use serde::Deserialize;

use crate::archive::{self, ArtifactName};
use crate::error::WorkspaceError;
use crate::types::{DeploymentId, EnvironmentId};

pub const CONTEXT_FILE: &str = "deploymentcontext.json";

/// The subset of the export context fctl reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExportContext {
    pub cluster: ClusterContext,
    #[serde(rename = "stackName", default)]
    pub stack_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClusterContext {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl ExportContext {
    /// Parse context bytes; `origin` is used only for error messages.
    pub fn parse(bytes: &[u8], origin: &Path) -> Result<Self, WorkspaceError> {
        let ctx: ExportContext =
            serde_json::from_slice(bytes).map_err(|e| WorkspaceError::MissingExportContext {
                path: origin.to_path_buf(),
                reason: e.to_string(),
            })?;
        if ctx.cluster.id.trim().is_empty() {
            return Err(WorkspaceError::MissingExportContext {
                path: origin.to_path_buf(),
                reason: "cluster.id is empty".to_string(),
            });
        }
        Ok(ctx)
    }

    pub fn environment(&self) -> EnvironmentId {
        EnvironmentId::from(self.cluster.id.clone())
    }
}

/// Read the context member of an artifact without extracting it.
pub fn read_from_artifact(zip_path: &Path) -> Result<ExportContext, WorkspaceError> {
    let bytes = archive::read_entry(zip_path, CONTEXT_FILE)?.ok_or_else(|| {
        WorkspaceError::MissingExportContext {
            path: zip_path.to_path_buf(),
            reason: format!("{CONTEXT_FILE} not found in archive"),
        }
    })?;
    ExportContext::parse(&bytes, zip_path)
}

/// Environment and deployment an artifact belongs to.
///
/// Legacy names carry the environment; otherwise it comes from the export context.
pub fn resolve_artifact(zip_path: &Path) -> Result<(EnvironmentId, DeploymentId), WorkspaceError> {
    let name = ArtifactName::parse(zip_path)?;
    let deployment = name.deployment().clone();
    let environment = match name.environment() {
        Some(env) => env.clone(),
        None => read_from_artifact(zip_path)?.environment(),
    };
    Ok((environment, deployment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::ZipWriter;

    fn artifact(dir: &Path, name: &str, context: Option<&str>) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        if let Some(body) = context {
            writer.start_file(CONTEXT_FILE, FileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.start_file("tfexport/main.tf", FileOptions::default()).unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn resolves_environment_from_context() {
        let tmp = TempDir::new().expect("tempdir");
        let zip = artifact(
            tmp.path(),
            "0b7c1f9e-3a41-4c1e-9d0e-6f2b8a7c5d41.zip",
            Some(r#"{"cluster":{"id":"env-123","name":"prod"},"stackName":"shop"}"#),
        );
        let (env, dep) = resolve_artifact(&zip).expect("resolve");
        assert_eq!(env.0, "env-123");
        assert_eq!(dep.0, "0b7c1f9e-3a41-4c1e-9d0e-6f2b8a7c5d41");
    }

    #[test]
    fn legacy_name_does_not_need_context() {
        let tmp = TempDir::new().expect("tempdir");
        let zip = artifact(tmp.path(), "terraform-export-env9-dep3-20240101-101010.zip", None);
        let (env, dep) = resolve_artifact(&zip).expect("resolve");
        assert_eq!((env.0.as_str(), dep.0.as_str()), ("env9", "dep3"));
    }

    #[test]
    fn empty_cluster_id_is_rejected() {
        let err = ExportContext::parse(br#"{"cluster":{"id":""}}"#, Path::new("ctx")).unwrap_err();
        assert!(err.to_string().contains("cluster.id"));
    }

    #[test]
    fn missing_context_member_is_reported() {
        let tmp = TempDir::new().expect("tempdir");
        let zip = artifact(tmp.path(), "0b7c1f9e-3a41-4c1e-9d0e-6f2b8a7c5d41.zip", None);
        let err = resolve_artifact(&zip).unwrap_err();
        assert!(matches!(err, WorkspaceError::MissingExportContext { .. }));
    }
}
