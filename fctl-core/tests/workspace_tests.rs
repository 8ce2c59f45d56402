//! Workspace lifecycle integration tests: materialize, carry-forward, retention.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use fctl_core::{
    differ, retention,
    retention::Protected,
    workspace::{self, CarriedState, MaterializeRequest, Materialized},
    DeploymentId, EnvironmentId, StateChoice, StateChooser, WorkspaceError,
};
use predicates::prelude::predicate;
use zip::write::FileOptions;
use zip::ZipWriter;

fn env() -> EnvironmentId {
    EnvironmentId::from("env-42")
}

fn dep(id: &str) -> DeploymentId {
    DeploymentId::from(id)
}

fn artifact(dir: &Path, deployment: &str, main_tf: &str) -> PathBuf {
    let path = dir.join(format!("{deployment}.zip"));
    let mut writer = ZipWriter::new(File::create(&path).expect("create zip"));
    for (name, body) in [
        ("deploymentcontext.json", r#"{"cluster":{"id":"env-42"}}"#),
        ("tfexport/main.tf", main_tf),
        ("tfexport/modules/db/main.tf", "resource \"null_resource\" \"x\" {}\n"),
    ] {
        writer.start_file(name, FileOptions::default()).expect("start");
        writer.write_all(body.as_bytes()).expect("write");
    }
    writer.finish().expect("finish");
    path
}

/// Records what it was offered and answers with a fixed choice.
struct Scripted {
    answer: StateChoice,
    offered: Vec<DeploymentId>,
    asked: bool,
}

impl Scripted {
    fn new(answer: StateChoice) -> Self {
        Self {
            answer,
            offered: vec![],
            asked: false,
        }
    }
}

impl StateChooser for Scripted {
    fn choose(
        &mut self,
        candidates: &[DeploymentId],
        _latest: Option<&Path>,
    ) -> Result<StateChoice, WorkspaceError> {
        self.asked = true;
        self.offered = candidates.to_vec();
        Ok(self.answer.clone())
    }
}

fn materialize(
    home: &Path,
    deployment: &str,
    zip: &Path,
    chooser: &mut dyn StateChooser,
) -> Result<(workspace::Workspace, Materialized), WorkspaceError> {
    let id = dep(deployment);
    workspace::materialize_at(
        home,
        &MaterializeRequest {
            environment: &env(),
            deployment: &id,
            artifact: zip,
            backend_configured: false,
        },
        chooser,
    )
}

// ---------------------------------------------------------------------------
// 1. Materialize
// ---------------------------------------------------------------------------

#[test]
fn first_materialize_extracts_and_marks_creation() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let zip = artifact(home.path(), "d1", "module \"level2\" {}\n");
    let mut chooser = Scripted::new(StateChoice::Fresh);

    let (ws, outcome) = materialize(home.path(), "d1", &zip, &mut chooser).expect("materialize");

    assert_eq!(
        outcome,
        Materialized::Created {
            carried: CarriedState::Nothing
        }
    );
    assert!(!chooser.asked, "no earlier deployments, nothing to ask");
    home.child(".facets/env-42/d1/tfexport/main.tf")
        .assert(predicate::str::contains("level2"));
    home.child(".facets/env-42/d1/.fctl-created")
        .assert(predicate::path::exists());
    assert!(!differ::differs(&zip, &ws.dir).expect("differ"));
}

#[test]
fn unchanged_artifact_is_not_reextracted() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let zip = artifact(home.path(), "d1", "module \"level2\" {}\n");
    let mut chooser = Scripted::new(StateChoice::Fresh);
    let (ws, _) = materialize(home.path(), "d1", &zip, &mut chooser).expect("first");

    // A local-only file survives a no-op materialize.
    fs::write(ws.root.join("local.txt"), "keep").expect("write");
    let (_, outcome) = materialize(home.path(), "d1", &zip, &mut chooser).expect("second");

    assert_eq!(outcome, Materialized::Unchanged);
    assert!(ws.root.join("local.txt").exists());
}

#[test]
fn edited_workspace_is_reextracted() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let zip = artifact(home.path(), "d1", "module \"level2\" {}\n");
    let mut chooser = Scripted::new(StateChoice::Fresh);
    let (ws, _) = materialize(home.path(), "d1", &zip, &mut chooser).expect("first");

    fs::write(ws.root.join("main.tf"), "edited").expect("write");
    let (_, outcome) = materialize(home.path(), "d1", &zip, &mut chooser).expect("second");

    assert_eq!(outcome, Materialized::Reextracted);
    assert_eq!(
        fs::read_to_string(ws.root.join("main.tf")).expect("read"),
        "module \"level2\" {}\n"
    );
}

// ---------------------------------------------------------------------------
// 2. State carry-forward
// ---------------------------------------------------------------------------

#[test]
fn carry_forward_copies_selected_deployment_state() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let state = br#"{"version":4,"serial":7,"lineage":"abc"}"#;

    let d1_state = workspace::state_path_at(home.path(), &env(), &dep("d1"));
    fs::create_dir_all(d1_state.parent().expect("parent")).expect("mkdir");
    fs::write(&d1_state, state).expect("write state");

    let zip = artifact(home.path(), "d2", "module \"level2\" {}\n");
    let mut chooser = Scripted::new(StateChoice::Deployment(dep("d1")));
    let (ws, outcome) = materialize(home.path(), "d2", &zip, &mut chooser).expect("materialize");

    assert_eq!(chooser.offered, vec![dep("d1")]);
    assert_eq!(
        outcome,
        Materialized::Created {
            carried: CarriedState::Deployment(dep("d1"))
        }
    );
    assert_eq!(fs::read(&ws.state_path).expect("read"), state.to_vec());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&ws.state_path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[test]
fn carry_forward_from_stateless_deployment_fails_naming_it() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    fs::create_dir_all(workspace::deployment_dir_at(home.path(), &env(), &dep("d1")))
        .expect("mkdir");

    let zip = artifact(home.path(), "d2", "module \"level2\" {}\n");
    let mut chooser = Scripted::new(StateChoice::Deployment(dep("d1")));
    let err = materialize(home.path(), "d2", &zip, &mut chooser).unwrap_err();

    assert!(matches!(err, WorkspaceError::StateCarryForward { .. }), "got: {err}");
    assert!(err.to_string().contains("d1"));
}

#[test]
fn latest_snapshot_seeds_first_deployment() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let latest = workspace::latest_state_path_at(home.path(), &env());
    fs::create_dir_all(latest.parent().expect("parent")).expect("mkdir");
    fs::write(&latest, "latest-state").expect("write");

    let zip = artifact(home.path(), "d1", "module \"level2\" {}\n");
    let mut chooser = Scripted::new(StateChoice::Fresh);
    let (ws, outcome) = materialize(home.path(), "d1", &zip, &mut chooser).expect("materialize");

    assert_eq!(
        outcome,
        Materialized::Created {
            carried: CarriedState::Latest(latest)
        }
    );
    assert_eq!(fs::read_to_string(&ws.state_path).expect("read"), "latest-state");
}

#[test]
fn backend_workspaces_skip_carry_forward() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    fs::create_dir_all(workspace::deployment_dir_at(home.path(), &env(), &dep("d1")))
        .expect("mkdir");
    let zip = artifact(home.path(), "d2", "module \"level2\" {}\n");
    let mut chooser = Scripted::new(StateChoice::Deployment(dep("d1")));

    let id = dep("d2");
    let (ws, outcome) = workspace::materialize_at(
        home.path(),
        &MaterializeRequest {
            environment: &env(),
            deployment: &id,
            artifact: &zip,
            backend_configured: true,
        },
        &mut chooser,
    )
    .expect("materialize");

    assert!(!chooser.asked);
    assert!(matches!(outcome, Materialized::Created { carried: CarriedState::Nothing }));
    assert!(!ws.state_path.exists());
}

// ---------------------------------------------------------------------------
// 3. Retention
// ---------------------------------------------------------------------------

#[test]
fn prune_keeps_ten_largest_of_fifteen_unmarked() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    for i in 0..15 {
        fs::create_dir_all(workspace::deployment_dir_at(
            home.path(),
            &env(),
            &dep(&format!("2024{i:02}")),
        ))
        .expect("mkdir");
    }

    let report = retention::prune_at(home.path(), &env(), Protected::default(), 10).expect("prune");

    assert_eq!(report.removed_deployments.len(), 5);
    let left = workspace::list_deployments_at(home.path(), &env(), None).expect("list");
    let mut names: Vec<String> = left.into_iter().map(|d| d.0).collect();
    names.sort();
    let expected: Vec<String> = (5..15).map(|i| format!("2024{i:02}")).collect();
    assert_eq!(names, expected);
}

#[test]
fn prune_keeps_ten_newest_materialized() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut chooser = Scripted::new(StateChoice::Fresh);
    for i in 0..15 {
        let name = format!("d{i:02}");
        let zip = artifact(home.path(), &name, "module \"level2\" {}\n");
        materialize(home.path(), &name, &zip, &mut chooser).expect("materialize");
    }

    retention::prune_at(home.path(), &env(), Protected::default(), 10).expect("prune");

    for i in 0..5 {
        home.child(format!(".facets/env-42/d{i:02}"))
            .assert(predicate::path::missing());
    }
    for i in 5..15 {
        home.child(format!(".facets/env-42/d{i:02}"))
            .assert(predicate::path::is_dir());
    }
}
