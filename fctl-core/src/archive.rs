//! Export artifacts: naming, extraction, repackaging.
//!
//! An artifact is a zip whose root holds `deploymentcontext.json`, `tfexport/`
//! and `modules/`. Two naming schemes are accepted:
//!
//! ```text
//! <deployment-id>.zip
//! terraform-export-<env>-<deployment>-<YYYYMMDD>-<HHMMSS>.zip   (legacy)
//! ```

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{io_err, zip_err, WorkspaceError};
use crate::types::{DeploymentId, EnvironmentId};

static DEPLOYMENT_ARTIFACT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([a-fA-F0-9-]{24,36})\.zip$").ok());

static LEGACY_ARTIFACT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^terraform-export-([^-]+)-([^-]+)-\d{8}-\d{6}\.zip$").ok()
});

/// Zips kept in the base directory and subject to retention.
static RETAINED_ARTIFACT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-fA-F0-9\-]{36}\.zip$").ok());

// ---------------------------------------------------------------------------
// 1. Naming
// ---------------------------------------------------------------------------

/// Identifiers recovered from an artifact file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactName {
    Deployment {
        deployment: DeploymentId,
    },
    Legacy {
        environment: EnvironmentId,
        deployment: DeploymentId,
    },
}

impl ArtifactName {
    pub fn parse(path: &Path) -> Result<Self, WorkspaceError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if let Some(caps) = DEPLOYMENT_ARTIFACT.as_ref().and_then(|re| re.captures(&name)) {
            return Ok(ArtifactName::Deployment {
                deployment: DeploymentId::from(&caps[1]),
            });
        }
        if let Some(caps) = LEGACY_ARTIFACT.as_ref().and_then(|re| re.captures(&name)) {
            return Ok(ArtifactName::Legacy {
                environment: EnvironmentId::from(&caps[1]),
                deployment: DeploymentId::from(&caps[2]),
            });
        }
        Err(WorkspaceError::InvalidArtifactName { name })
    }

    pub fn deployment(&self) -> &DeploymentId {
        match self {
            ArtifactName::Deployment { deployment } | ArtifactName::Legacy { deployment, .. } => {
                deployment
            }
        }
    }

    /// Only legacy names embed the environment.
    pub fn environment(&self) -> Option<&EnvironmentId> {
        match self {
            ArtifactName::Legacy { environment, .. } => Some(environment),
            ArtifactName::Deployment { .. } => None,
        }
    }
}

/// Whether `file_name` is a UUID-named artifact eligible for retention pruning.
pub fn is_retained_artifact(file_name: &str) -> bool {
    RETAINED_ARTIFACT
        .as_ref()
        .map(|re| re.is_match(file_name))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// 2. Reading
// ---------------------------------------------------------------------------

pub fn open(path: &Path) -> Result<ZipArchive<File>, WorkspaceError> {
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    ZipArchive::new(file).map_err(|e| zip_err(path, e))
}

/// Read a single member without extracting the archive. `Ok(None)` when absent.
pub fn read_entry(zip_path: &Path, name: &str) -> Result<Option<Vec<u8>>, WorkspaceError> {
    let mut archive = open(zip_path)?;
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(zip_err(zip_path, e)),
    };
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut buf)
        .map_err(|e| io_err(zip_path, e))?;
    Ok(Some(buf))
}

/// Extract every member of `zip_path` under `dest`, returning the number of files written.
///
/// Members whose names would escape `dest` are skipped with a warning.
pub fn extract(zip_path: &Path, dest: &Path) -> Result<usize, WorkspaceError> {
    let mut archive = open(zip_path)?;
    fs::create_dir_all(dest).map_err(|e| io_err(dest, e))?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(|e| zip_err(zip_path, e))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!("skipping unsafe archive member {}", entry.name());
            continue;
        };
        let target = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| io_err(&target, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| io_err(&target, e))?;
        set_mode(&target, entry.unix_mode())?;
        written += 1;
    }
    Ok(written)
}

// ---------------------------------------------------------------------------
// 3. Writing
// ---------------------------------------------------------------------------

/// Archive the tree under `source` into `target` (deflated), returning the file count.
///
/// Empty directories are recorded; symlinks and other non-regular files are skipped.
/// The archive is written to a `.tmp` sibling and renamed into place.
pub fn zip_dir(source: &Path, target: &Path) -> Result<usize, WorkspaceError> {
    let tmp = tmp_sibling(target);
    let file = File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
    let mut writer = ZipWriter::new(file);
    let count = append_tree(&mut writer, source, "", &tmp)?;
    writer.finish().map_err(|e| zip_err(&tmp, e))?;
    fs::rename(&tmp, target).map_err(|e| io_err(target, e))?;
    Ok(count)
}

/// Rewrite `zip_path` with extra members: each `(source, name)` pair copies a local
/// file or directory to `name` inside the archive, replacing members of the same name.
pub fn add_files(zip_path: &Path, pairs: &[(PathBuf, String)]) -> Result<(), WorkspaceError> {
    let prefixes: Vec<String> = pairs.iter().map(|(_, dst)| normalize_member(dst)).collect();
    rewrite(zip_path, zip_path, &prefixes, |writer, tmp| {
        for ((src, _), dst) in pairs.iter().zip(&prefixes) {
            if src.is_dir() {
                append_tree(writer, src, dst, tmp)?;
            } else {
                append_file(writer, src, dst, tmp)?;
            }
        }
        Ok(())
    })
}

/// Replace everything under `destination` inside `zip_path` with the tree at `source`,
/// writing the result to `output` (which may equal `zip_path`).
pub fn replace_subtree(
    zip_path: &Path,
    source: &Path,
    destination: &str,
    output: &Path,
) -> Result<usize, WorkspaceError> {
    let prefix = normalize_member(destination);
    let mut count = 0;
    rewrite(zip_path, output, std::slice::from_ref(&prefix), |writer, tmp| {
        count = append_tree(writer, source, &prefix, tmp)?;
        Ok(())
    })?;
    Ok(count)
}

/// Copy `input` to `output` dropping members under any of `drop_prefixes`, then let
/// `extend` append new members.
fn rewrite<F>(
    input: &Path,
    output: &Path,
    drop_prefixes: &[String],
    extend: F,
) -> Result<(), WorkspaceError>
where
    F: FnOnce(&mut ZipWriter<File>, &Path) -> Result<(), WorkspaceError>,
{
    let mut archive = open(input)?;
    let tmp = tmp_sibling(output);
    let file = File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
    let mut writer = ZipWriter::new(file);

    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).map_err(|e| zip_err(input, e))?;
        let name = entry.name().trim_end_matches('/').to_string();
        if drop_prefixes
            .iter()
            .any(|p| name == *p || name.starts_with(&format!("{p}/")))
        {
            continue;
        }
        writer.raw_copy_file(entry).map_err(|e| zip_err(&tmp, e))?;
    }
    drop(archive);
    extend(&mut writer, &tmp)?;
    writer.finish().map_err(|e| zip_err(&tmp, e))?;
    fs::rename(&tmp, output).map_err(|e| io_err(output, e))?;
    Ok(())
}

fn append_tree(
    writer: &mut ZipWriter<File>,
    source: &Path,
    prefix: &str,
    tmp: &Path,
) -> Result<usize, WorkspaceError> {
    let mut count = 0;
    for entry in WalkDir::new(source).sort_by_file_name().min_depth(1) {
        let entry = entry.map_err(|e| walk_err(source, e))?;
        let path = entry.path();
        // The in-progress archive may live inside the tree being zipped.
        if path == tmp {
            continue;
        }
        let relative = path.strip_prefix(source).unwrap_or(path);
        let name = join_member(prefix, &member_name(relative));

        if entry.file_type().is_dir() {
            let empty = fs::read_dir(path)
                .map_err(|e| io_err(path, e))?
                .next()
                .is_none();
            if empty {
                writer
                    .add_directory(name, options(0o755))
                    .map_err(|e| zip_err(tmp, e))?;
            }
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        append_file(writer, path, &name, tmp)?;
        count += 1;
    }
    Ok(count)
}

fn append_file(
    writer: &mut ZipWriter<File>,
    path: &Path,
    name: &str,
    tmp: &Path,
) -> Result<(), WorkspaceError> {
    let mode = file_mode(path);
    writer
        .start_file(name, options(mode))
        .map_err(|e| zip_err(tmp, e))?;
    let mut input = File::open(path).map_err(|e| io_err(path, e))?;
    io::copy(&mut input, writer).map_err(|e| io_err(tmp, e))?;
    writer.flush().map_err(|e| io_err(tmp, e))?;
    Ok(())
}

fn options(mode: u32) -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(mode)
}

// ---------------------------------------------------------------------------
// 4. Permissions
// ---------------------------------------------------------------------------

/// Normalise modes under `root`: 0755 directories, 0644 files, 0755 provider binaries.
/// State files keep their mode.
pub fn fix_permissions(root: &Path) -> Result<(), WorkspaceError> {
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| walk_err(root, e))?;
        let path = entry.path();
        if entry.file_type().is_file() && is_state_file(path) {
            continue;
        }
        let mode = if entry.file_type().is_dir() || is_provider_binary(path) {
            0o755
        } else {
            0o644
        };
        set_mode(path, Some(mode))?;
    }
    Ok(())
}

fn is_state_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    name.ends_with(".tfstate") || name.ends_with(".tfstate.backup")
}

fn is_provider_binary(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    name.contains("terraform-provider-") || name.ends_with(".provider")
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn tmp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact.zip".to_string());
    target.with_file_name(format!("{name}.tmp"))
}

/// Zip member names always use `/`.
fn member_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn normalize_member(name: &str) -> String {
    name.replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn join_member(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

pub(crate) fn walk_err(root: &Path, err: walkdir::Error) -> WorkspaceError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
    io_err(path, source)
}

#[cfg(unix)]
fn file_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o777)
        .unwrap_or(0o644)
}
#[cfg(not(unix))]
fn file_mode(_path: &Path) -> u32 {
    0o644
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: Option<u32>) -> Result<(), WorkspaceError> {
    use std::os::unix::fs::PermissionsExt;
    let Some(mode) = mode else { return Ok(()) };
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777)).map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: Option<u32>) -> Result<(), WorkspaceError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
