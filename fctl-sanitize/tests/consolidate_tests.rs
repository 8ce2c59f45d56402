use std::fs;
use std::path::{Path, PathBuf};

use fctl_sanitize::{consolidate, EnvTree, ModuleConflict};
use tempfile::TempDir;

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, body).expect("write");
}

/// A flattened environment with one module file and a level-2 call into it.
fn env(project: &Path, name: &str, module_main: &str) -> EnvTree {
    let dir = project.join(name);
    write(&dir.join("modules/db/main.tf"), module_main);
    write(
        &dir.join("modules/db/locals.tf"),
        "locals {\n  ctx = jsondecode(file(\"../../deploymentcontext.json\"))\n}\n",
    );
    write(
        &dir.join("level2/main.tf"),
        "module \"db\" {\n  source = \"../../modules/db\"\n}\n",
    );
    write(&dir.join("deploymentcontext.json"), "{}");
    EnvTree {
        name: name.to_string(),
        dir,
    }
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .map(|e| e.expect("walk"))
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(dir).expect("prefix").to_path_buf())
        .collect();
    files.sort();
    files
}

#[test]
fn identical_modules_are_deduplicated_silently() {
    let project = TempDir::new().expect("tempdir");
    let envs = [
        env(project.path(), "prod", "resource \"a\" \"b\" {}\n"),
        env(project.path(), "staging", "resource \"a\" \"b\" {}\n"),
    ];

    let report = consolidate(project.path(), &envs).expect("consolidate");

    assert!(report.conflicts.is_empty());
    assert_eq!(report.deduplicated, 2);
    assert_eq!(report.merged, vec!["prod", "staging"]);
    assert_eq!(
        files_under(&project.path().join("modules")),
        vec![PathBuf::from("db/locals.tf"), PathBuf::from("db/main.tf")]
    );
    for env in &envs {
        assert!(!env.dir.join("modules").exists());
        assert_eq!(
            fs::read_to_string(env.dir.join("level2/main.tf")).expect("read"),
            "module \"db\" {\n  source = \"../../modules/db\"\n}\n"
        );
        assert!(env.dir.join("level2/deploymentcontext.json").is_file());
    }
    let locals = fs::read_to_string(project.path().join("modules/db/locals.tf")).expect("read");
    assert!(locals.contains("file(\"./deploymentcontext.json\")"));
}

#[test]
fn differing_modules_keep_first_and_report_one_conflict() {
    let project = TempDir::new().expect("tempdir");
    let envs = [
        env(project.path(), "prod", "resource \"a\" \"prod\" {}\n"),
        env(project.path(), "staging", "resource \"a\" \"staging\" {}\n"),
    ];

    let report = consolidate(project.path(), &envs).expect("consolidate");

    assert_eq!(
        report.conflicts,
        vec![ModuleConflict {
            relative: PathBuf::from("db/main.tf"),
            kept_from: "prod".to_string(),
            rejected_from: "staging".to_string(),
        }]
    );
    assert_eq!(
        fs::read_to_string(project.path().join("modules/db/main.tf")).expect("read"),
        "resource \"a\" \"prod\" {}\n"
    );
    assert_eq!(files_under(&project.path().join("modules")).len(), 2);
}

#[test]
fn environment_without_modules_is_still_repointed() {
    let project = TempDir::new().expect("tempdir");
    let bare = project.path().join("dev");
    write(
        &bare.join("level2/main.tf"),
        "module \"db\" {\n  source = \"../../../modules/db\"\n}\n",
    );
    let envs = [EnvTree {
        name: "dev".to_string(),
        dir: bare.clone(),
    }];

    let report = consolidate(project.path(), &envs).expect("consolidate");

    assert_eq!(report.merged, vec!["dev"]);
    assert_eq!(
        fs::read_to_string(bare.join("level2/main.tf")).expect("read"),
        "module \"db\" {\n  source = \"../../modules/db\"\n}\n"
    );
}

#[test]
fn failed_merge_is_rolled_back_and_keeps_own_modules() {
    let project = TempDir::new().expect("tempdir");
    let prod = env(project.path(), "prod", "resource \"a\" \"b\" {}\n");
    // prod ships `cache` as a plain file, so staging's `cache/` cannot be created
    write(&prod.dir.join("modules/cache"), "not a directory");
    let staging = env(project.path(), "staging", "resource \"a\" \"b\" {}\n");
    write(&staging.dir.join("modules/api/main.tf"), "resource \"api\" \"x\" {}\n");
    write(&staging.dir.join("modules/cache/main.tf"), "resource \"cache\" \"x\" {}\n");

    let report = consolidate(project.path(), &[prod.clone(), staging.clone()]).expect("consolidate");

    assert_eq!(report.merged, vec!["prod"]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, "staging");

    assert_eq!(
        files_under(&project.path().join("modules")),
        vec![
            PathBuf::from("cache"),
            PathBuf::from("db/locals.tf"),
            PathBuf::from("db/main.tf"),
        ]
    );
    assert!(!project.path().join("modules/api").exists());

    assert_eq!(
        files_under(&staging.dir.join("modules")),
        vec![
            PathBuf::from("api/main.tf"),
            PathBuf::from("cache/main.tf"),
            PathBuf::from("db/locals.tf"),
            PathBuf::from("db/main.tf"),
        ]
    );
    assert!(!staging.dir.join(".modules-merging").exists());
    assert_eq!(
        fs::read_to_string(staging.dir.join("level2/main.tf")).expect("read"),
        "module \"db\" {\n  source = \"../modules/db\"\n}\n"
    );
}
