//! Orchestrator tests against an in-memory control plane and provisioning tool.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use fctl_core::{
    DeployAction, DeploymentId, Environment, EnvironmentId, ExportJob, ExportStatus, InitMode,
    ProjectName, Provisioner, RemoteJobStatus, RunOutcome, WorkspaceError,
};
use fctl_export::{
    export_all, BoardDisplay, Download, ExportAllRequest, RemoteExport, RemoteJobApi,
    RemoteJobError,
};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::ZipWriter;

const PROJECT: &str = "shop";

fn artifact_bytes(env: &EnvironmentId) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let context = format!(r#"{{"cluster":{{"id":"{env}"}}}}"#);
    for (name, body) in [
        ("deploymentcontext.json", context.as_str()),
        (
            "tfexport/main.tf",
            "module \"level2\" {\n  source = \"./level2\"\n}\n",
        ),
        (
            "tfexport/level2/main.tf",
            "module \"db\" {\n  source = \"../../modules/db\"\n}\n",
        ),
        (
            "tfexport/downloaded-terraform.tfstate",
            r#"{"version":4,"terraform_version":"1.5.7","resources":[]}"#,
        ),
        (
            "modules/db/main.tf",
            "resource \"aws_db_instance\" \"db\" {\n  engine = \"mysql\"\n}\n",
        ),
    ] {
        writer.start_file(name, FileOptions::default()).expect("start");
        writer.write_all(body.as_bytes()).expect("write");
    }
    writer.finish().expect("finish").into_inner()
}

/// Control plane with scripted behaviour per environment.
#[derive(Default)]
struct FakeControlPlane {
    envs: Vec<Environment>,
    reject_trigger: Vec<EnvironmentId>,
    fail_job: Vec<EnvironmentId>,
    active: HashMap<EnvironmentId, DeploymentId>,
    triggered: Mutex<Vec<EnvironmentId>>,
    polls: Mutex<HashMap<DeploymentId, u32>>,
}

impl FakeControlPlane {
    fn with_envs(count: usize) -> Self {
        Self {
            envs: (1..=count)
                .map(|i| Environment::new(format!("e-{i}"), format!("env{i}")))
                .collect(),
            ..Self::default()
        }
    }

    fn triggered(&self) -> Vec<EnvironmentId> {
        self.triggered.lock().unwrap().clone()
    }
}

impl RemoteJobApi for FakeControlPlane {
    fn projects(&self) -> Result<Vec<ProjectName>, RemoteJobError> {
        Ok(vec![ProjectName::from("other"), ProjectName::from(PROJECT)])
    }

    fn environments(&self, _project: &ProjectName) -> Result<Vec<Environment>, RemoteJobError> {
        Ok(self.envs.clone())
    }

    fn exports(&self, env: &EnvironmentId) -> Result<Vec<RemoteExport>, RemoteJobError> {
        Ok(self
            .active
            .get(env)
            .map(|id| RemoteExport {
                id: id.clone(),
                status: RemoteJobStatus::Queued,
                created_on: Some(Utc::now()),
                time_taken_secs: None,
            })
            .into_iter()
            .collect())
    }

    fn trigger(&self, env: &EnvironmentId) -> Result<ExportJob, RemoteJobError> {
        self.triggered.lock().unwrap().push(env.clone());
        if self.reject_trigger.contains(env) {
            return Err(RemoteJobError::NotRunnable(
                "Cannot trigger terraform export on an environment that is not in a running state"
                    .into(),
            ));
        }
        Ok(ExportJob {
            environment: env.clone(),
            id: DeploymentId(format!("dep-{env}")),
            status: RemoteJobStatus::InProgress,
            started_at: Utc::now(),
        })
    }

    fn status(
        &self,
        env: &EnvironmentId,
        job: &DeploymentId,
    ) -> Result<RemoteJobStatus, RemoteJobError> {
        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(job.clone()).or_insert(0);
        *count += 1;
        if *count < 2 {
            return Ok(RemoteJobStatus::InProgress);
        }
        if self.fail_job.contains(env) {
            return Ok(RemoteJobStatus::Failed { detail: None });
        }
        Ok(RemoteJobStatus::Succeeded)
    }

    fn download(
        &self,
        env: &EnvironmentId,
        _job: &DeploymentId,
    ) -> Result<Download, RemoteJobError> {
        let bytes = artifact_bytes(env);
        Ok(Download {
            length: Some(bytes.len() as u64),
            body: Box::new(Cursor::new(bytes)),
        })
    }
}

#[derive(Default)]
struct FakeTool {
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl FakeTool {
    fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().unwrap().clone()
    }
    fn record(&self, dir: &Path, call: String) {
        self.calls.lock().unwrap().push((dir.to_path_buf(), call));
    }
}

impl Provisioner for FakeTool {
    fn init(&self, dir: &Path, mode: InitMode) -> Result<(), WorkspaceError> {
        self.record(dir, format!("init {mode:?}"));
        Ok(())
    }

    fn select_or_create_workspace(&self, dir: &Path, name: &str) -> Result<(), WorkspaceError> {
        self.record(dir, format!("workspace {name}"));
        Ok(())
    }

    fn run(
        &self,
        dir: &Path,
        action: DeployAction,
        _target: Option<&str>,
    ) -> Result<RunOutcome, WorkspaceError> {
        self.record(dir, action.to_string());
        Ok(RunOutcome::Applied)
    }

    fn show_state(&self, _dir: &Path) -> Result<serde_json::Value, WorkspaceError> {
        Ok(serde_json::json!({}))
    }

    fn state_push(&self, dir: &Path, state: &Path) -> Result<(), WorkspaceError> {
        assert!(state.is_absolute());
        self.record(dir, "state push".to_string());
        Ok(())
    }
}

fn request(output: &Path, skip_failed: bool) -> ExportAllRequest {
    ExportAllRequest {
        project: ProjectName::from(PROJECT),
        output_dir: output.to_path_buf(),
        skip_failed,
        include_providers: false,
        poll_interval: Duration::from_secs(5),
        refresh: Duration::from_millis(500),
        display: BoardDisplay::Hidden,
    }
}

// ---------------------------------------------------------------------------
// Partial failure containment
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn one_rejected_trigger_leaves_four_complete_and_post_processed() {
    let output = TempDir::new().expect("tempdir");
    let mut plane = FakeControlPlane::with_envs(5);
    plane.reject_trigger.push(EnvironmentId::from("e-3"));
    let plane = Arc::new(plane);
    let tool = Arc::new(FakeTool::default());

    let summary = export_all(plane.clone(), tool.clone(), request(output.path(), true))
        .await
        .expect("export all");

    let complete: Vec<&str> = summary
        .succeeded()
        .map(|e| e.environment.name.as_str())
        .collect();
    assert_eq!(complete, vec!["env1", "env2", "env4", "env5"]);
    let failed: Vec<_> = summary.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].environment.id, EnvironmentId::from("e-3"));
    assert_eq!(failed[0].status, ExportStatus::Failed);
    assert!(failed[0].detail.contains("not in a running state"));

    let post = summary.post_process.as_ref().expect("post-processed");
    assert_eq!(post.flattened, vec!["env1", "env2", "env4", "env5"]);
    assert_eq!(post.state_pushed, vec!["env1", "env2", "env4", "env5"]);
    let consolidation = post.consolidation.as_ref().expect("consolidated");
    assert_eq!(consolidation.merged, vec!["env1", "env2", "env4", "env5"]);
    assert!(consolidation.conflicts.is_empty());

    let project = output.path().join(PROJECT);
    assert!(project.join("modules/db/main.tf").is_file());
    assert!(!project.join("env3").exists());
    for env in ["env1", "env2", "env4", "env5"] {
        let dir = project.join(env);
        assert!(dir.join("main.tf").is_file(), "{env} not flattened");
        assert!(!dir.join("tfexport").exists());
        assert!(!dir.join("modules").exists());
        assert!(!dir.join("downloaded-terraform.tfstate").exists());
        let zips = std::fs::read_dir(&dir)
            .expect("read env dir")
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|x| x == "zip"))
            .count();
        assert_eq!(zips, 0, "{env} kept its download");
    }

    let pushes = tool
        .calls()
        .into_iter()
        .filter(|(_, call)| call == "state push")
        .count();
    assert_eq!(pushes, 4);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn failure_without_skip_failed_skips_post_processing() {
    let output = TempDir::new().expect("tempdir");
    let mut plane = FakeControlPlane::with_envs(2);
    plane.fail_job.push(EnvironmentId::from("e-2"));
    let tool = Arc::new(FakeTool::default());

    let summary = export_all(Arc::new(plane), tool.clone(), request(output.path(), false))
        .await
        .expect("export all");

    assert!(!summary.is_success());
    assert!(summary.post_process.is_none());
    let failed: Vec<_> = summary.failed().collect();
    assert_eq!(failed[0].detail, "export failed");
    assert!(output.path().join(PROJECT).join("env1/tfexport/main.tf").is_file());
    assert!(tool.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Remote job reuse and lookup
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn running_export_is_awaited_instead_of_triggering() {
    let output = TempDir::new().expect("tempdir");
    let mut plane = FakeControlPlane::with_envs(1);
    plane
        .active
        .insert(EnvironmentId::from("e-1"), DeploymentId::from("dep-running"));
    let plane = Arc::new(plane);

    let summary = export_all(
        plane.clone(),
        Arc::new(FakeTool::default()),
        request(output.path(), true),
    )
    .await
    .expect("export all");

    assert!(plane.triggered().is_empty());
    assert!(summary.is_success());
    assert_eq!(
        summary.environments[0].deployment,
        Some(DeploymentId::from("dep-running"))
    );
    assert_eq!(summary.environments[0].detail, format!("{PROJECT}/env1/"));
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn unknown_project_is_reported() {
    let output = TempDir::new().expect("tempdir");
    let plane = Arc::new(FakeControlPlane::with_envs(1));
    let mut req = request(output.path(), true);
    req.project = ProjectName::from("missing");

    let err = export_all(plane, Arc::new(FakeTool::default()), req)
        .await
        .expect_err("missing project");

    assert_eq!(err.to_string(), "project (stack) not found: missing");
}
