//! Walk a configuration tree, apply the rule table and write the results.
//!
//! [`plan`] computes every change without touching disk; [`Plan::apply`] writes it.
//! A file that cannot be read or parsed is left alone and reported as a
//! [`SanitizationWarning`]; the walk always continues.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use similar::TextDiff;
use walkdir::WalkDir;

use crate::error::{io_err, SanitizationWarning, SanitizeError};
use crate::hcl::Body;
use crate::rules::{self, FileContext, FileRole};
use crate::state;

/// One pending change to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Rewrite {
        path: PathBuf,
        before: String,
        after: String,
    },
    /// A discarded file or directory, or a file the rules left without content.
    Delete { path: PathBuf },
}

impl Change {
    pub fn path(&self) -> &Path {
        match self {
            Change::Rewrite { path, .. } | Change::Delete { path } => path,
        }
    }
}

/// Everything a sanitize run would do.
#[derive(Debug, Default)]
pub struct Plan {
    pub root: PathBuf,
    pub changes: Vec<Change>,
    pub warnings: Vec<SanitizationWarning>,
}

/// What a sanitize run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SanitizeReport {
    pub rewritten: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub warnings: Vec<SanitizationWarning>,
}

impl SanitizeReport {
    pub fn is_clean(&self) -> bool {
        self.rewritten.is_empty() && self.deleted.is_empty()
    }
}

/// Sanitize `root` in place.
pub fn sanitize(root: &Path) -> Result<SanitizeReport, SanitizeError> {
    plan(root)?.apply()
}

/// Compute the changes for `root` without writing anything.
pub fn plan(root: &Path) -> Result<Plan, SanitizeError> {
    let meta = fs::metadata(root).map_err(|e| io_err(root, e))?;
    if !meta.is_dir() {
        return Err(SanitizeError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut plan = Plan {
        root: root.to_path_buf(),
        ..Plan::default()
    };
    let mut walker = WalkDir::new(root).sort_by_file_name().into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().unwrap_or(root).to_path_buf();
                plan.warnings.push(SanitizationWarning::new(path, err));
                continue;
            }
        };
        let path = entry.path();
        let rel = rules::relative_key(root, path);

        if entry.file_type().is_dir() {
            if entry.depth() > 0 && rules::is_skipped_dir(&entry.file_name().to_string_lossy()) {
                walker.skip_current_dir();
            } else if rules::is_discarded_dir(&rel) {
                plan.changes.push(Change::Delete {
                    path: path.to_path_buf(),
                });
                walker.skip_current_dir();
            }
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        match plan_file(path, &rel) {
            Ok(Some(change)) => plan.changes.push(change),
            Ok(None) => {}
            Err(warning) => plan.warnings.push(warning),
        }
    }
    Ok(plan)
}

fn plan_file(path: &Path, rel: &str) -> Result<Option<Change>, SanitizationWarning> {
    let role = rules::classify(rel);
    let delete = || {
        Some(Change::Delete {
            path: path.to_path_buf(),
        })
    };
    match role {
        FileRole::PassThrough => Ok(None),
        FileRole::Discard => Ok(delete()),
        FileRole::RawState | FileRole::ModuleInputs => {
            let before = read(path)?;
            let mut doc: Value = serde_json::from_str(&before)
                .map_err(|e| SanitizationWarning::new(path, format!("invalid JSON: {e}")))?;
            let changed = match role {
                FileRole::RawState => state::scrub_state(&mut doc),
                _ => state::strip_input_metadata(&mut doc),
            };
            if !changed {
                return Ok(None);
            }
            let after = serde_json::to_string_pretty(&doc)
                .map_err(|e| SanitizationWarning::new(path, e))?;
            Ok(Some(Change::Rewrite {
                path: path.to_path_buf(),
                before,
                after,
            }))
        }
        _ => {
            let before = read(path)?;
            let mut body = Body::parse(&before).map_err(|e| SanitizationWarning::new(path, e))?;
            let ctx = FileContext { rel };
            let mut changed = false;
            for transform in rules::transforms(role) {
                changed |= transform(&mut body, &ctx);
            }
            if !changed {
                return Ok(None);
            }
            if body.is_empty() {
                return Ok(delete());
            }
            body.tidy();
            let after = body.render();
            if after == before {
                return Ok(None);
            }
            Ok(Some(Change::Rewrite {
                path: path.to_path_buf(),
                before,
                after,
            }))
        }
    }
}

fn read(path: &Path) -> Result<String, SanitizationWarning> {
    fs::read_to_string(path).map_err(|e| SanitizationWarning::new(path, e))
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Unified diffs for rewrites and one line per deletion, paths relative to the root.
    pub fn render_diff(&self) -> String {
        let mut out = String::new();
        for change in &self.changes {
            let relative = change.path().strip_prefix(&self.root).unwrap_or(change.path());
            match change {
                Change::Rewrite { before, after, .. } => {
                    let old_header = format!("a/{}", relative.display());
                    let new_header = format!("b/{}", relative.display());
                    let unified = TextDiff::from_lines(before, after)
                        .unified_diff()
                        .header(&old_header, &new_header)
                        .context_radius(3)
                        .to_string();
                    out.push_str(&unified);
                }
                Change::Delete { .. } => {
                    out.push_str(&format!("deleted: {}\n", relative.display()));
                }
            }
        }
        out
    }

    /// Write every change. A change that fails to land becomes a warning.
    pub fn apply(self) -> Result<SanitizeReport, SanitizeError> {
        let mut report = SanitizeReport {
            warnings: self.warnings,
            ..SanitizeReport::default()
        };
        for change in self.changes {
            match change {
                Change::Rewrite { path, after, .. } => match fs::write(&path, after) {
                    Ok(()) => report.rewritten.push(path),
                    Err(err) => report.warnings.push(SanitizationWarning::new(path, err)),
                },
                Change::Delete { path } => {
                    let removed = if path.is_dir() {
                        fs::remove_dir_all(&path)
                    } else {
                        fs::remove_file(&path)
                    };
                    match removed {
                        Ok(()) => report.deleted.push(path),
                        Err(err) => report.warnings.push(SanitizationWarning::new(path, err)),
                    }
                }
            }
        }
        tracing::info!(
            "sanitized {}: {} rewritten, {} deleted, {} skipped",
            self.root.display(),
            report.rewritten.len(),
            report.deleted.len(),
            report.warnings.len()
        );
        Ok(report)
    }
}
