use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

fn fctl_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("fctl"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG");
    cmd
}

fn write(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, body).expect("write");
}

fn export_tree(root: &Path) {
    write(root, "deploymentcontext.json", r#"{"cluster":{"id":"env-1"}}"#);
    write(
        root,
        "tfexport/main.tf",
        "module \"level2\" {\n  source      = \"./level2\"\n  cc_metadata = var.cc_metadata\n}\n",
    );
    write(root, "tfexport/cc_metadata.tf", "locals {\n  cc = var.cc_metadata\n}\n");
    write(root, "modules/db/1.0/facets.yaml", "intent: db\n");
}

fn zip_with(path: &Path, members: &[(&str, &str)]) {
    let mut writer = ZipWriter::new(File::create(path).expect("create"));
    for (name, body) in members {
        writer.start_file(*name, FileOptions::default()).expect("start");
        writer.write_all(body.as_bytes()).expect("write");
    }
    writer.finish().expect("finish");
}

fn member(path: &Path, name: &str) -> Option<String> {
    let mut archive = ZipArchive::new(File::open(path).expect("open")).expect("zip");
    let mut entry = archive.by_name(name).ok()?;
    let mut body = String::new();
    entry.read_to_string(&mut body).expect("read");
    Some(body)
}

// ---------------------------------------------------------------------------
// clean
// ---------------------------------------------------------------------------

#[test]
fn clean_dry_run_prints_diff_and_writes_nothing() {
    let home = TempDir::new().expect("home");
    let tree = TempDir::new().expect("tree");
    export_tree(tree.path());

    fctl_cmd(home.path())
        .args(["clean", "--dry-run"])
        .arg(tree.path())
        .assert()
        .success()
        .stdout(contains("deleted: tfexport/cc_metadata.tf"))
        .stdout(contains("-  cc_metadata = var.cc_metadata"))
        .stdout(contains("[dry-run]"));

    assert!(tree.path().join("tfexport/cc_metadata.tf").exists());
    assert!(tree.path().join("modules/db/1.0/facets.yaml").exists());
}

#[test]
fn clean_rewrites_then_reports_clean() {
    let home = TempDir::new().expect("home");
    let tree = TempDir::new().expect("tree");
    export_tree(tree.path());

    fctl_cmd(home.path())
        .arg("clean")
        .arg(tree.path())
        .assert()
        .success()
        .stdout(contains("✓ cleaned"));

    assert!(!tree.path().join("tfexport/cc_metadata.tf").exists());
    assert!(!tree.path().join("modules/db/1.0/facets.yaml").exists());
    let main = fs::read_to_string(tree.path().join("tfexport/main.tf")).expect("main");
    assert!(!main.contains("cc_metadata"));

    fctl_cmd(home.path())
        .arg("clean")
        .arg(tree.path())
        .assert()
        .success()
        .stdout(contains("already clean"));
}

// ---------------------------------------------------------------------------
// repackage
// ---------------------------------------------------------------------------

#[test]
fn repackage_replaces_subtree_into_new_artifact() {
    let home = TempDir::new().expect("home");
    let work = TempDir::new().expect("work");
    let artifact = work.path().join("7d2f5e10-4b8a-4c3e-9a61-2f0c8e5b7a19.zip");
    zip_with(
        &artifact,
        &[
            ("deploymentcontext.json", r#"{"cluster":{"id":"env-1"}}"#),
            ("tfexport/modules/db/main.tf", "old"),
            ("tfexport/modules/db/stale.tf", "stale"),
        ],
    );
    let source = work.path().join("db");
    write(&source, "main.tf", "new");
    let output: PathBuf = work.path().join("out.zip");

    fctl_cmd(home.path())
        .args(["repackage", "--destination", "tfexport/modules/db"])
        .arg("--zip")
        .arg(&artifact)
        .arg("--source")
        .arg(&source)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    assert_eq!(member(&output, "tfexport/modules/db/main.tf").as_deref(), Some("new"));
    assert!(member(&output, "tfexport/modules/db/stale.tf").is_none());
    assert!(member(&output, "deploymentcontext.json").is_some());
    assert_eq!(member(&artifact, "tfexport/modules/db/main.tf").as_deref(), Some("old"));
}

#[test]
fn repackage_requires_output_or_inplace() {
    let home = TempDir::new().expect("home");
    fctl_cmd(home.path())
        .args(["repackage", "--zip", "a.zip", "--source", ".", "--destination", "x"])
        .assert()
        .failure();
}

// ---------------------------------------------------------------------------
// export
// ---------------------------------------------------------------------------

#[test]
fn export_without_credentials_fails_with_hint() {
    let home = TempDir::new().expect("home");
    fctl_cmd(home.path())
        .args(["export", "--env-id", "env-1"])
        .assert()
        .failure()
        .stderr(contains("failed to load credentials"))
        .stderr(contains("log in first"));
}

#[test]
fn export_rejects_malformed_copy() {
    let home = TempDir::new().expect("home");
    fctl_cmd(home.path())
        .args(["export", "--env-id", "env-1", "--copy", "nocolon"])
        .assert()
        .failure()
        .stderr(contains("expected format source:destination"));
}
