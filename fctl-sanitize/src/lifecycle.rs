//! `lifecycle { prevent_destroy = false }` on every managed resource, so a destroy
//! run is not refused by the exported configuration.

use std::fs;
use std::path::Path;

use fctl_core::{ConfigRewriter, WorkspaceError};
use walkdir::WalkDir;

use crate::hcl::{Block, Body};
use crate::rules;

const LIFECYCLE: &str = "lifecycle {\n  prevent_destroy = false\n}\n";

/// [`ConfigRewriter`] backed by the structural editor.
#[derive(Debug, Default, Clone, Copy)]
pub struct LifecycleRewriter;

impl ConfigRewriter for LifecycleRewriter {
    fn allow_destroy(&self, root: &Path) -> Result<usize, WorkspaceError> {
        let mut changed = 0;
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !rules::is_skipped_dir(&e.file_name().to_string_lossy()));
        for entry in walker {
            let entry = entry.map_err(|err| WorkspaceError::Io {
                path: err.path().unwrap_or(root).to_path_buf(),
                source: err.into(),
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().map_or(true, |ext| ext != "tf") {
                continue;
            }
            let src = fs::read_to_string(path).map_err(|source| WorkspaceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let Some(out) = rewrite(&src, path) else {
                continue;
            };
            fs::write(path, out).map_err(|source| WorkspaceError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            changed += 1;
        }
        Ok(changed)
    }
}

/// The rewritten file, or `None` when nothing changed or the file could not be parsed.
fn rewrite(src: &str, path: &Path) -> Option<String> {
    let mut body = match Body::parse(src) {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!("leaving {} as is: {err}", path.display());
            return None;
        }
    };
    let mut changed = false;
    for resource in body
        .blocks_mut()
        .filter(|b| b.kind() == "resource" && b.labels().len() == 2)
    {
        changed |= allow_destroy(resource, path);
    }
    changed.then(|| body.render())
}

fn allow_destroy(resource: &mut Block, path: &Path) -> bool {
    if let Some(lifecycle) = resource
        .body_mut()
        .blocks_mut()
        .find(|b| b.kind() == "lifecycle")
    {
        return lifecycle.set_attribute("prevent_destroy", "false");
    }
    match resource.append_block_source(LIFECYCLE) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!("{}: cannot add lifecycle block: {err}", path.display());
            false
        }
    }
}
