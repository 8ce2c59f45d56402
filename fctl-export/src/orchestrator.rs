//! Fan-out over a project's environments, live board, join, post-process.
//!
//! ```text
//! export_all
//!   ├─ one ExportMachine task per environment (no cap)
//!   ├─ ticker task: snapshot board -> redraw, every `refresh`
//!   ├─ join all workers, stop ticker, grace delay, final frame
//!   └─ post_process(successful subset) on the blocking pool
//! ```

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use fctl_core::{DeploymentId, Environment, ExportStatus, ProjectName, Provisioner};
use fctl_sanitize::EnvTree;

use crate::error::{io_err, ExportError};
use crate::machine::{ExportMachine, ExportOutcome, ExportTarget};
use crate::postprocess::{post_process, PostProcessReport};
use crate::progress::{render_board, BoardPrinter, ProgressBoard};
use crate::remote::{ensure_project, RemoteJobApi};
use crate::runtime::{blocking, handle_join};

/// Pause between the last worker finishing and the final frame.
pub const FINAL_RENDER_GRACE: Duration = Duration::from_millis(100);

/// How the board reaches the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardDisplay {
    /// Redraw in place every refresh tick, then the final frame.
    Live,
    /// Only the final frame.
    Final,
    Hidden,
}

#[derive(Debug, Clone)]
pub struct ExportAllRequest {
    pub project: ProjectName,
    pub output_dir: PathBuf,
    /// Post-process the successful environments even when some failed.
    pub skip_failed: bool,
    pub include_providers: bool,
    pub poll_interval: Duration,
    pub refresh: Duration,
    pub display: BoardDisplay,
}

/// Final state of one environment.
#[derive(Debug, Clone)]
pub struct EnvSummary {
    pub environment: Environment,
    pub status: ExportStatus,
    pub deployment: Option<DeploymentId>,
    /// Output location when complete, error text when failed.
    pub detail: String,
}

#[derive(Debug)]
pub struct ExportAllSummary {
    pub project: ProjectName,
    pub project_dir: PathBuf,
    pub environments: Vec<EnvSummary>,
    /// `None` when post-processing was skipped or there was nothing to export.
    pub post_process: Option<PostProcessReport>,
}

impl ExportAllSummary {
    pub fn succeeded(&self) -> impl Iterator<Item = &EnvSummary> {
        self.environments
            .iter()
            .filter(|e| e.status == ExportStatus::Complete)
    }

    pub fn failed(&self) -> impl Iterator<Item = &EnvSummary> {
        self.environments
            .iter()
            .filter(|e| e.status != ExportStatus::Complete)
    }

    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Export every environment of `req.project` into `<output>/<project>/<env-name>/`.
pub async fn export_all(
    api: Arc<dyn RemoteJobApi>,
    provisioner: Arc<dyn Provisioner>,
    req: ExportAllRequest,
) -> Result<ExportAllSummary, ExportError> {
    let envs = {
        let api = api.clone();
        let project = req.project.clone();
        blocking("list_environments", move || {
            ensure_project(api.as_ref(), &project)?;
            Ok(api.environments(&project)?)
        })
        .await?
    };

    let project_dir = req.output_dir.join(&req.project.0);
    let mut summary = ExportAllSummary {
        project: req.project.clone(),
        project_dir: project_dir.clone(),
        environments: Vec::new(),
        post_process: None,
    };
    if envs.is_empty() {
        tracing::warn!(project = %req.project, "project has no environments");
        return Ok(summary);
    }
    std::fs::create_dir_all(&project_dir).map_err(|e| io_err(&project_dir, e))?;
    tracing::info!(project = %req.project, environments = envs.len(), "exporting project");

    let board = ProgressBoard::new(&envs);
    let dir_names = directory_names(&envs);

    let mut workers = Vec::with_capacity(envs.len());
    for (env, dir_name) in envs.iter().zip(&dir_names) {
        let machine = ExportMachine::new(
            api.clone(),
            provisioner.clone(),
            board.clone(),
            env.clone(),
            req.poll_interval,
        );
        let target = ExportTarget::Extracted {
            env_dir: project_dir.join(dir_name),
            label: format!("{}/{}/", req.project, dir_name),
            include_providers: req.include_providers,
        };
        workers.push((env.clone(), tokio::spawn(machine.run(target))));
    }

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let ticker = {
        let board = board.clone();
        let live = req.display == BoardDisplay::Live;
        let refresh = req.refresh;
        tokio::spawn(async move { ticker_task(board, refresh, live, stop_rx).await })
    };

    let mut outcomes: Vec<ExportOutcome> = Vec::new();
    for (env, handle) in workers {
        match handle_join(&format!("export {}", env.name), handle.await) {
            Ok(outcome) => outcomes.push(outcome),
            Err(err @ ExportError::Join { .. }) => {
                board.fail(&env.id, err.to_string());
            }
            Err(_) => {}
        }
    }

    let _ = stop_tx.send(());
    let mut printer = handle_join("ticker", ticker.await)?;
    tokio::time::sleep(FINAL_RENDER_GRACE).await;
    if req.display != BoardDisplay::Hidden {
        let frame = render_board(&board.snapshot(), printer.is_live());
        let mut stdout = std::io::stdout().lock();
        printer
            .draw(&mut stdout, &frame)
            .map_err(|e| io_err("<stdout>", e))?;
    }

    summary.environments = board
        .snapshot()
        .into_iter()
        .map(|row| {
            let outcome = outcomes.iter().find(|o| o.environment.id == row.id);
            EnvSummary {
                environment: Environment::new(row.id.clone(), row.name.clone()),
                status: row.status,
                deployment: outcome.map(|o| o.deployment.clone()),
                detail: row.text,
            }
        })
        .collect();

    let failed = summary.failed().count();
    if failed > 0 && !req.skip_failed {
        tracing::warn!(
            project = %req.project,
            failed,
            "exports failed; skipping post-processing (use --skip-failed to continue with the rest)"
        );
        return Ok(summary);
    }

    let trees: Vec<EnvTree> = outcomes
        .iter()
        .map(|o| EnvTree {
            name: o.environment.name.clone(),
            dir: o.path.clone(),
        })
        .collect();
    let report = blocking("post_process", move || {
        Ok(post_process(&project_dir, &trees, provisioner.as_ref()))
    })
    .await?;
    summary.post_process = Some(report);
    Ok(summary)
}

/// Draw the board every `refresh` until told to stop; hand back the printer
/// so the final frame replaces the last live one.
async fn ticker_task(
    board: ProgressBoard,
    refresh: Duration,
    live: bool,
    mut stop: oneshot::Receiver<()>,
) -> Result<BoardPrinter, ExportError> {
    let mut printer = BoardPrinter::new(live);
    if !live {
        let _ = stop.await;
        return Ok(printer);
    }
    let mut interval = tokio::time::interval(refresh);
    loop {
        tokio::select! {
            _ = &mut stop => return Ok(printer),
            _ = interval.tick() => {
                let frame = render_board(&board.snapshot(), true);
                let mut stdout = std::io::stdout().lock();
                if let Err(err) = printer.draw(&mut stdout, &frame) {
                    tracing::debug!(error = %err, "board redraw failed");
                }
                let _ = stdout.flush();
            }
        }
    }
}

/// Directory name per environment; repeated names get the environment id appended.
fn directory_names(envs: &[Environment]) -> Vec<String> {
    let mut seen = HashSet::new();
    envs.iter()
        .map(|env| {
            let name = sanitize_dir_name(&env.name);
            if seen.insert(name.clone()) {
                name
            } else {
                format!("{name}-{}", env.id)
            }
        })
        .collect()
}

fn sanitize_dir_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => crate::remote::UNNAMED_ENVIRONMENT.to_string(),
        _ => cleaned,
    }
}

// ---------------------------------------------------------------------------
// Single environment
// ---------------------------------------------------------------------------

/// Export one environment to a sanitized artifact in `output_dir`.
pub async fn export_one(
    api: Arc<dyn RemoteJobApi>,
    provisioner: Arc<dyn Provisioner>,
    env: Environment,
    target: ExportTarget,
    poll_interval: Duration,
    refresh: Duration,
    display: BoardDisplay,
) -> Result<ExportOutcome, ExportError> {
    let board = ProgressBoard::new(std::slice::from_ref(&env));
    let machine = ExportMachine::new(api, provisioner, board.clone(), env.clone(), poll_interval);
    let worker = tokio::spawn(machine.run(target));

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let ticker = {
        let board = board.clone();
        let live = display == BoardDisplay::Live;
        tokio::spawn(async move { ticker_task(board, refresh, live, stop_rx).await })
    };

    let result = handle_join(&format!("export {}", env.name), worker.await);
    let _ = stop_tx.send(());
    let mut printer = handle_join("ticker", ticker.await)?;
    if display != BoardDisplay::Hidden {
        let frame = render_board(&board.snapshot(), printer.is_live());
        let mut stdout = std::io::stdout().lock();
        printer
            .draw(&mut stdout, &frame)
            .map_err(|e| io_err("<stdout>", e))?;
    }
    result
}
