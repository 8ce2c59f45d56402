//! One environment's export, driven from `Pending` to `Complete` or `Failed`.
//!
//! Remote calls and disk work run on the blocking pool; only the poll sleep
//! happens on the async side.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use fctl_core::{
    archive, format_duration, DeploymentId, Environment, EnvironmentId, ExportStatus, InitMode,
    Provisioner, RemoteJobStatus,
};

use crate::error::{io_err, ExportError, RemoteJobError};
use crate::postprocess::EXPORT_ROOT;
use crate::progress::ProgressBoard;
use crate::remote::{find_active, RemoteJobApi};
use crate::runtime::blocking;

/// Minimum gap between two download progress updates.
pub const PROGRESS_THROTTLE: Duration = Duration::from_millis(100);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Where a finished export ends up.
#[derive(Debug, Clone)]
pub enum ExportTarget {
    /// Keep a sanitized `<deployment>.zip` in `output_dir`.
    Archive {
        output_dir: PathBuf,
        include_providers: bool,
    },
    /// Extract and sanitize in `env_dir`; the downloaded zip is removed.
    Extracted {
        env_dir: PathBuf,
        label: String,
        include_providers: bool,
    },
}

/// What a completed export produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub environment: Environment,
    pub deployment: DeploymentId,
    /// The artifact (archive target) or the environment directory (extracted target).
    pub path: PathBuf,
}

/// The per-environment worker.
pub struct ExportMachine {
    api: Arc<dyn RemoteJobApi>,
    provisioner: Arc<dyn Provisioner>,
    board: ProgressBoard,
    env: Environment,
    poll_interval: Duration,
}

impl ExportMachine {
    pub fn new(
        api: Arc<dyn RemoteJobApi>,
        provisioner: Arc<dyn Provisioner>,
        board: ProgressBoard,
        env: Environment,
        poll_interval: Duration,
    ) -> Self {
        Self {
            api,
            provisioner,
            board,
            env,
            poll_interval,
        }
    }

    /// Run to a terminal state. Any error has already been recorded on the board.
    pub async fn run(self, target: ExportTarget) -> Result<ExportOutcome, ExportError> {
        match self.drive(&target).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::warn!(env = %self.env.id, name = %self.env.name, error = %err, "export failed");
                self.board.fail(&self.env.id, err.to_string());
                Err(err)
            }
        }
    }

    async fn drive(&self, target: &ExportTarget) -> Result<ExportOutcome, ExportError> {
        let (deployment, already_elapsed) = self.attach_or_trigger().await?;
        self.wait(&deployment, already_elapsed).await?;

        let download_dir = match target {
            ExportTarget::Archive { output_dir, .. } => output_dir.clone(),
            ExportTarget::Extracted { env_dir, .. } => env_dir.clone(),
        };
        let zip_path = self.download(&deployment, &download_dir).await?;

        let path = match target {
            ExportTarget::Archive {
                include_providers, ..
            } => self.repackage(zip_path, *include_providers).await?,
            ExportTarget::Extracted {
                env_dir,
                include_providers,
                ..
            } => self.unpack(zip_path, env_dir.clone(), *include_providers).await?,
        };

        let shown = match target {
            ExportTarget::Archive { .. } => path.display().to_string(),
            ExportTarget::Extracted { label, .. } => label.clone(),
        };
        self.set(ExportStatus::Complete, shown);
        tracing::info!(env = %self.env.id, deployment = %deployment, path = %path.display(), "export complete");

        Ok(ExportOutcome {
            environment: self.env.clone(),
            deployment,
            path,
        })
    }

    fn set(&self, status: ExportStatus, text: impl Into<String>) {
        self.board.update(&self.env.id, status, text);
    }

    // -----------------------------------------------------------------------
    // 1. Trigger or attach
    // -----------------------------------------------------------------------

    /// Reuse a queued or running export, else start one.
    async fn attach_or_trigger(&self) -> Result<(DeploymentId, Duration), ExportError> {
        let api = self.api.clone();
        let env = self.env.id.clone();
        let exports = blocking("list_exports", move || Ok(api.exports(&env)?)).await?;

        if let Some(active) = find_active(&exports) {
            self.set(
                ExportStatus::Waiting,
                format!("Found existing export (status: {})", active.status),
            );
            let elapsed = active
                .created_on
                .and_then(|t| (Utc::now() - t).to_std().ok())
                .unwrap_or_default();
            tracing::info!(env = %self.env.id, deployment = %active.id, "waiting on existing export");
            return Ok((active.id.clone(), elapsed));
        }

        self.set(ExportStatus::Triggering, "");
        let api = self.api.clone();
        let env = self.env.id.clone();
        let job = blocking("trigger_export", move || Ok(api.trigger(&env)?)).await?;
        self.set(ExportStatus::Waiting, "Export triggered");
        tracing::info!(env = %self.env.id, deployment = %job.id, "export triggered");
        let elapsed = (Utc::now() - job.started_at).to_std().unwrap_or_default();
        Ok((job.id, elapsed))
    }

    // -----------------------------------------------------------------------
    // 2. Poll
    // -----------------------------------------------------------------------

    async fn wait(&self, deployment: &DeploymentId, already: Duration) -> Result<(), ExportError> {
        let started = tokio::time::Instant::now();
        loop {
            tokio::time::sleep(self.poll_interval).await;

            let api = self.api.clone();
            let env = self.env.id.clone();
            let job = deployment.clone();
            let status = blocking("poll_export", move || Ok(api.status(&env, &job)?)).await?;

            match status {
                RemoteJobStatus::Succeeded => return Ok(()),
                RemoteJobStatus::Failed { detail } => {
                    let reason = detail.unwrap_or_else(|| "export failed".to_string());
                    return Err(RemoteJobError::JobFailed(reason).into());
                }
                RemoteJobStatus::Queued | RemoteJobStatus::InProgress => {
                    let elapsed = already + started.elapsed();
                    self.set(
                        ExportStatus::Waiting,
                        format!("Export in progress ({})...", format_duration(elapsed)),
                    );
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // 3. Download
    // -----------------------------------------------------------------------

    async fn download(
        &self,
        deployment: &DeploymentId,
        dir: &Path,
    ) -> Result<PathBuf, ExportError> {
        self.set(ExportStatus::Downloading, "Starting download...");

        let api = self.api.clone();
        let board = self.board.clone();
        let env = self.env.id.clone();
        let job = deployment.clone();
        let zip_path = dir.join(format!("{deployment}.zip"));
        let target = zip_path.clone();
        let dir = dir.to_path_buf();

        blocking("download_export", move || {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            let mut download = api.download(&env, &job)?;
            let file = File::create(&target).map_err(|e| io_err(&target, e))?;
            let mut writer = ProgressWriter::new(file, board, env, download.length);
            io::copy(&mut download.body, &mut writer).map_err(|e| ExportError::Transfer {
                path: target.clone(),
                reason: e.to_string(),
            })?;
            writer.flush().map_err(|e| io_err(&target, e))?;
            Ok(())
        })
        .await?;
        Ok(zip_path)
    }

    // -----------------------------------------------------------------------
    // 4. Extract and clean
    // -----------------------------------------------------------------------

    /// Clean the artifact through a scratch directory and re-zip it in place.
    async fn repackage(
        &self,
        zip_path: PathBuf,
        include_providers: bool,
    ) -> Result<PathBuf, ExportError> {
        self.set(ExportStatus::Extracting, "");
        let scratch = tempfile::Builder::new()
            .prefix("fctl-export-process-")
            .tempdir()
            .map_err(|e| io_err(std::env::temp_dir(), e))?;
        let root = scratch.path().to_path_buf();
        {
            let (zip, root) = (zip_path.clone(), root.clone());
            blocking("extract_export", move || {
                archive::extract(&zip, &root)?;
                archive::fix_permissions(&root)?;
                Ok(())
            })
            .await?;
        }

        self.set(ExportStatus::Cleaning, "");
        let provisioner = self.provisioner.clone();
        let zip = zip_path.clone();
        blocking("clean_export", move || {
            clean_tree(&root, provisioner.as_ref(), include_providers)?;
            archive::zip_dir(&root, &zip)?;
            Ok(())
        })
        .await?;
        drop(scratch);
        Ok(zip_path)
    }

    /// Extract into the environment directory, clean it and drop the zip.
    async fn unpack(
        &self,
        zip_path: PathBuf,
        env_dir: PathBuf,
        include_providers: bool,
    ) -> Result<PathBuf, ExportError> {
        self.set(ExportStatus::Extracting, "");
        {
            let (zip, dir) = (zip_path.clone(), env_dir.clone());
            blocking("extract_export", move || {
                archive::extract(&zip, &dir)?;
                Ok(())
            })
            .await?;
        }

        self.set(ExportStatus::Cleaning, "");
        let provisioner = self.provisioner.clone();
        let dir = env_dir.clone();
        blocking("clean_export", move || {
            clean_tree(&dir, provisioner.as_ref(), include_providers)?;
            discard_download(&zip_path);
            Ok(())
        })
        .await?;
        Ok(env_dir)
    }
}

/// Delete a downloaded archive once its contents are in place. A failure leaves
/// the export complete and is only logged.
fn discard_download(zip_path: &Path) -> bool {
    match fs::remove_file(zip_path) {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                path = %zip_path.display(),
                error = %err,
                "could not remove downloaded archive"
            );
            false
        }
    }
}

fn clean_tree(
    root: &Path,
    provisioner: &dyn Provisioner,
    include_providers: bool,
) -> Result<(), ExportError> {
    let report = fctl_sanitize::sanitize(root)?;
    tracing::debug!(
        root = %root.display(),
        rewritten = report.rewritten.len(),
        deleted = report.deleted.len(),
        warnings = report.warnings.len(),
        "sanitized export"
    );
    if include_providers {
        let export_root = root.join(EXPORT_ROOT);
        provisioner.init(&export_root, InitMode::Default)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Download progress
// ---------------------------------------------------------------------------

/// Passes bytes through to `inner`, publishing throttled progress text.
struct ProgressWriter<W> {
    inner: W,
    board: ProgressBoard,
    env: EnvironmentId,
    total: Option<u64>,
    written: u64,
    started: Instant,
    last_report: Option<Instant>,
}

impl<W: Write> ProgressWriter<W> {
    fn new(inner: W, board: ProgressBoard, env: EnvironmentId, total: Option<u64>) -> Self {
        Self {
            inner,
            board,
            env,
            total,
            written: 0,
            started: Instant::now(),
            last_report: None,
        }
    }

    fn report(&mut self) {
        let now = Instant::now();
        if self
            .last_report
            .is_some_and(|last| now.duration_since(last) < PROGRESS_THROTTLE)
        {
            return;
        }
        self.last_report = Some(now);
        let text = download_text(self.written, self.total, now.duration_since(self.started));
        self.board.update(&self.env, ExportStatus::Downloading, text);
    }
}

impl<W: Write> Write for ProgressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        self.report();
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `42.0% (4.2MB/10.0MB) at 1.4 MB/s - 4s remaining`, or the byte count alone
/// when the total is unknown.
pub fn download_text(written: u64, total: Option<u64>, elapsed: Duration) -> String {
    let done_mb = written as f64 / BYTES_PER_MB;
    let secs = elapsed.as_secs_f64();
    let speed = if secs > 0.0 { done_mb / secs } else { 0.0 };

    match total {
        Some(total) if total > 0 => {
            let total_mb = total as f64 / BYTES_PER_MB;
            let pct = written as f64 / total as f64 * 100.0;
            let remaining = if speed > 0.0 {
                Duration::try_from_secs_f64((total_mb - done_mb).max(0.0) / speed)
                    .map(format_duration)
                    .unwrap_or_else(|_| "unknown".to_string())
            } else {
                "unknown".to_string()
            };
            format!("{pct:.1}% ({done_mb:.1}MB/{total_mb:.1}MB) at {speed:.1} MB/s - {remaining} remaining")
        }
        _ => format!("{done_mb:.1}MB downloaded at {speed:.1} MB/s"),
    }
}
