//! Merge every environment's `modules/` tree into one project-level tree.
//!
//! Environments are processed in the order given; the first environment to
//! contribute a relative path owns it. Later copies with identical bytes are
//! dropped silently, differing ones are reported as [`ModuleConflict`]s and
//! ignored. An environment whose merge fails keeps its own `modules/` and its
//! sources are pointed there instead.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::error::{io_err, SanitizeError};

pub const MODULES_DIR: &str = "modules";
pub const CONTEXT_FILE: &str = "deploymentcontext.json";

const LEVEL2_DIR: &str = "level2";

/// Where an environment's `modules/` waits while it is merged.
const STAGED_MODULES_DIR: &str = ".modules-merging";

/// Module sources in level-2 calls: `"../../modules/...`
static MODULE_SOURCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#""(\.\./)+modules/"#).ok());

/// One exported environment, already flattened (`main.tf`, `level2/`, `modules/` at its root).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvTree {
    pub name: String,
    pub dir: PathBuf,
}

/// Two environments shipped different content for the same module file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleConflict {
    pub relative: PathBuf,
    pub kept_from: String,
    pub rejected_from: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConsolidationReport {
    pub copied: usize,
    pub deduplicated: usize,
    pub conflicts: Vec<ModuleConflict>,
    /// Environments merged into the shared tree.
    pub merged: Vec<String>,
    /// Environments left with their own modules, with the reason.
    pub skipped: Vec<(String, String)>,
}

// ---------------------------------------------------------------------------
// 1. Consolidation
// ---------------------------------------------------------------------------

/// Merge `envs` into `<project_dir>/modules` and repoint their references.
pub fn consolidate(project_dir: &Path, envs: &[EnvTree]) -> Result<ConsolidationReport, SanitizeError> {
    let target = project_dir.join(MODULES_DIR);
    fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;

    let mut report = ConsolidationReport::default();
    let mut owners: BTreeMap<PathBuf, String> = BTreeMap::new();

    for env in envs {
        if let Err(err) = relocate_context(&env.dir) {
            tracing::warn!("{}: could not relocate {CONTEXT_FILE} references: {err}", env.name);
        }

        let own = env.dir.join(MODULES_DIR);
        let staged = env.dir.join(STAGED_MODULES_DIR);
        let mut merge = EnvMerge::default();
        let merged = stage_modules(&own, &staged).and_then(|present| {
            if present {
                merge_env(&target, &staged, env, &owners, &mut merge)
            } else {
                Ok(())
            }
        });
        let modules_dir = match merged {
            Ok(()) => {
                if let Err(err) = remove_dir_if_present(&staged) {
                    tracing::warn!("{}: could not remove merged modules: {err}", env.name);
                }
                for relative in merge.added.drain(..) {
                    owners.insert(relative, env.name.clone());
                }
                report.copied += merge.copied;
                report.deduplicated += merge.deduplicated;
                report.conflicts.append(&mut merge.conflicts);
                report.merged.push(env.name.clone());
                target.clone()
            }
            Err(err) => {
                tracing::warn!("{}: skipping module consolidation: {err}", env.name);
                roll_back(&target, &merge.added, &env.name);
                report.skipped.push((env.name.clone(), err.to_string()));
                let own = restore_modules(&staged, own, &env.name);
                if own.is_dir() {
                    if let Err(err) = rewrite_context_refs(&own) {
                        tracing::warn!("{}: could not rewrite module references: {err}", env.name);
                    }
                }
                own
            }
        };

        if let Err(err) = repoint_module_sources(&env.dir, &modules_dir) {
            tracing::warn!("{}: could not repoint module sources: {err}", env.name);
        }
    }

    rewrite_context_refs(&target)?;
    tracing::info!(
        "consolidated modules of {} environment(s): {} file(s), {} duplicate(s), {} conflict(s)",
        report.merged.len(),
        report.copied,
        report.deduplicated,
        report.conflicts.len()
    );
    Ok(report)
}

#[derive(Debug, Default)]
struct EnvMerge {
    added: Vec<PathBuf>,
    copied: usize,
    deduplicated: usize,
    conflicts: Vec<ModuleConflict>,
}

/// Move `own` aside to `staged`. `false` when the environment has no modules.
fn stage_modules(own: &Path, staged: &Path) -> Result<bool, SanitizeError> {
    if !own.is_dir() {
        return Ok(false);
    }
    fs::rename(own, staged).map_err(|e| io_err(own, e))?;
    Ok(true)
}

/// Put a staged `modules/` back. Returns wherever the environment's modules now live.
fn restore_modules(staged: &Path, own: PathBuf, env: &str) -> PathBuf {
    if !staged.is_dir() {
        return own;
    }
    match fs::rename(staged, &own) {
        Ok(()) => own,
        Err(err) => {
            tracing::warn!("{env}: could not restore {}: {err}", own.display());
            staged.to_path_buf()
        }
    }
}

/// Remove the files a failed merge already copied, and the directories it left empty.
fn roll_back(target: &Path, added: &[PathBuf], env: &str) {
    for relative in added {
        let path = target.join(relative);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!("{env}: could not roll back {}: {err}", path.display());
            }
        }
        let mut dir = path.parent();
        while let Some(parent) = dir.filter(|d| *d != target) {
            // stops at the first directory still holding files
            if fs::remove_dir(parent).is_err() {
                break;
            }
            dir = parent.parent();
        }
    }
}

fn merge_env(
    target: &Path,
    source: &Path,
    env: &EnvTree,
    owners: &BTreeMap<PathBuf, String>,
    merge: &mut EnvMerge,
) -> Result<(), SanitizeError> {
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|err| SanitizeError::Io {
            path: err.path().unwrap_or(source).to_path_buf(),
            source: err.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(source).unwrap_or(path).to_path_buf();
        let dest = target.join(&relative);

        match owners.get(&relative) {
            Some(owner) => {
                let kept = fs::read(&dest).map_err(|e| io_err(&dest, e))?;
                let incoming = fs::read(path).map_err(|e| io_err(path, e))?;
                if kept == incoming {
                    merge.deduplicated += 1;
                } else {
                    tracing::warn!(
                        "module conflict at {}: keeping the {owner} version, ignoring {}",
                        relative.display(),
                        env.name
                    );
                    merge.conflicts.push(ModuleConflict {
                        relative,
                        kept_from: owner.clone(),
                        rejected_from: env.name.clone(),
                    });
                }
            }
            None => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                }
                fs::copy(path, &dest).map_err(|e| io_err(&dest, e))?;
                merge.added.push(relative);
                merge.copied += 1;
            }
        }
    }
    Ok(())
}

fn remove_dir_if_present(dir: &Path) -> Result<(), SanitizeError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(dir, err)),
    }
}

// ---------------------------------------------------------------------------
// 2. Reference rewriting
// ---------------------------------------------------------------------------

fn context_ref(prefix: &str) -> String {
    format!("file(\"{prefix}{CONTEXT_FILE}\")")
}

/// Replace the first form found in `path` with `./<context>`. A missing file is not an error.
fn rewrite_first_form(path: &Path, prefixes: &[&str]) -> Result<bool, SanitizeError> {
    let src = match fs::read_to_string(path) {
        Ok(src) => src,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(io_err(path, err)),
    };
    let Some(form) = prefixes
        .iter()
        .map(|p| context_ref(p))
        .find(|form| src.contains(form.as_str()))
    else {
        return Ok(false);
    };
    let out = src.replace(&form, &context_ref("./"));
    fs::write(path, out).map_err(|e| io_err(path, e))?;
    Ok(true)
}

/// Point one environment's context-file references at files beside the root and
/// level-2 configurations, copying the context into `level2/`.
pub fn relocate_context(env_dir: &Path) -> Result<(), SanitizeError> {
    rewrite_first_form(&env_dir.join("main.tf"), &["../"])?;

    let level2 = env_dir.join(LEVEL2_DIR);
    if !level2.is_dir() {
        return Ok(());
    }
    rewrite_first_form(&level2.join("main.tf"), &["../../"])?;

    let context = env_dir.join(CONTEXT_FILE);
    if context.is_file() {
        let dest = level2.join(CONTEXT_FILE);
        fs::copy(&context, &dest).map_err(|e| io_err(&dest, e))?;
    }
    rewrite_first_form(&level2.join("locals.tf"), &["../", "../../"])?;
    Ok(())
}

/// Rewrite context-file references in every configuration file of a module tree.
pub fn rewrite_context_refs(tree: &Path) -> Result<usize, SanitizeError> {
    let mut rewritten = 0;
    for entry in WalkDir::new(tree).sort_by_file_name() {
        let entry = entry.map_err(|err| SanitizeError::Io {
            path: err.path().unwrap_or(tree).to_path_buf(),
            source: err.into(),
        })?;
        let name = entry.file_name().to_string_lossy();
        if !entry.file_type().is_file() || !(name.ends_with(".tf") || name.ends_with(".tf.json")) {
            continue;
        }
        if rewrite_first_form(entry.path(), &["../", "../../", "../../../"])? {
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

/// Point `"../../modules/...` sources in `level2/main.tf` at `modules_dir`.
pub fn repoint_module_sources(env_dir: &Path, modules_dir: &Path) -> Result<bool, SanitizeError> {
    let main = env_dir.join(LEVEL2_DIR).join("main.tf");
    let src = match fs::read_to_string(&main) {
        Ok(src) => src,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(io_err(&main, err)),
    };
    let Some(pattern) = MODULE_SOURCE.as_ref() else {
        return Ok(false);
    };
    let relative = relative_path(&env_dir.join(LEVEL2_DIR), modules_dir);
    let replacement = format!("\"{}/", relative.trim_end_matches('/'));
    let out = pattern.replace_all(&src, regex::NoExpand(&replacement));
    if out == src {
        return Ok(false);
    }
    fs::write(&main, out.as_ref()).map_err(|e| io_err(&main, e))?;
    Ok(true)
}

/// `/`-separated path leading from directory `from` to `to`.
fn relative_path(from: &Path, to: &Path) -> String {
    let from: Vec<Component<'_>> = from.components().filter(|c| *c != Component::CurDir).collect();
    let to: Vec<Component<'_>> = to.components().filter(|c| *c != Component::CurDir).collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<String> = vec!["..".to_string(); from.len() - common];
    parts.extend(
        to[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_source_pattern_compiles() {
        assert!(MODULE_SOURCE.is_some());
    }

    #[test]
    fn relative_paths() {
        assert_eq!(
            relative_path(Path::new("/out/p/prod/level2"), Path::new("/out/p/modules")),
            "../../modules"
        );
        assert_eq!(
            relative_path(Path::new("/out/p/prod/level2"), Path::new("/out/p/prod/modules")),
            "../modules"
        );
        assert_eq!(relative_path(Path::new("a/b"), Path::new("a/b")), ".");
    }

    #[test]
    fn sources_are_repointed() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let env = dir.path().join("prod");
        fs::create_dir_all(env.join("level2")).expect("mkdir");
        fs::write(
            env.join("level2/main.tf"),
            "module \"db\" {\n  source = \"../../../modules/db/1.0\"\n}\n",
        )
        .expect("write");

        assert!(repoint_module_sources(&env, &env.join("modules")).expect("repoint"));
        assert_eq!(
            fs::read_to_string(env.join("level2/main.tf")).expect("read"),
            "module \"db\" {\n  source = \"../modules/db/1.0\"\n}\n"
        );
    }

    #[test]
    fn context_is_relocated_for_root_and_level2() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let env = dir.path();
        fs::create_dir_all(env.join("level2")).expect("mkdir");
        fs::write(env.join(CONTEXT_FILE), "{}").expect("write");
        fs::write(env.join("main.tf"), "locals { c = file(\"../deploymentcontext.json\") }\n").expect("write");
        fs::write(env.join("level2/locals.tf"), "locals { c = file(\"../../deploymentcontext.json\") }\n").expect("write");

        relocate_context(env).expect("relocate");

        for file in ["main.tf", "level2/locals.tf"] {
            let text = fs::read_to_string(env.join(file)).expect("read");
            assert!(text.contains("file(\"./deploymentcontext.json\")"), "{file}: {text}");
        }
        assert!(env.join("level2").join(CONTEXT_FILE).is_file());
    }
}
