//! Content differ: does an artifact still match the tree extracted from it?
//!
//! Only members of the archive are compared, by SHA-256 of their bytes. Files that
//! exist on disk but not in the archive (provider caches, lock files, state) are
//! irrelevant. Size and mtime are never consulted.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::archive;
use crate::error::{io_err, zip_err, WorkspaceError};

/// `Ok(true)` if any archive member is missing from `dir` or differs in content.
///
/// An `Err` means hashing could not complete; callers must treat it as "different".
pub fn differs(zip_path: &Path, dir: &Path) -> Result<bool, WorkspaceError> {
    let mut zip = archive::open(zip_path)?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| zip_err(zip_path, e))?;
        if entry.is_dir() {
            continue;
        }
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        let on_disk = dir.join(&relative);
        if !on_disk.is_file() {
            tracing::debug!("{} missing from {}", relative.display(), dir.display());
            return Ok(true);
        }

        let archived = sha256_reader(&mut entry).map_err(|e| io_err(zip_path, e))?;
        let local = sha256_file(&on_disk)?;
        if archived != local {
            tracing::debug!(
                "{} differs ({} != {})",
                relative.display(),
                hex::encode(archived),
                hex::encode(local)
            );
            return Ok(true);
        }
    }
    Ok(false)
}

/// SHA-256 of a file's bytes.
pub fn sha256_file(path: &Path) -> Result<[u8; 32], WorkspaceError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    sha256_reader(&mut file).map_err(|e| io_err(path, e))
}

fn sha256_reader<R: Read>(reader: &mut R) -> io::Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    io::copy(reader, &mut hasher)?;
    Ok(hasher.finalize().into())
}
