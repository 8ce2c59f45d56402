//! `fctl export-all` — export a whole project and consolidate its modules.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use fctl_core::{ExportStatus, ProjectName, TerraformCli};
use fctl_export::{export_all, BoardDisplay, ExportAllRequest, ExportAllSummary};

use super::{board_display, connect, home, load_settings, runtime};

/// Arguments for `fctl export-all`.
#[derive(Args, Debug)]
pub struct ExportAllArgs {
    /// Project (stack) whose environments are exported.
    #[arg(long, short = 'p')]
    pub project: String,

    /// Parent directory; environments land in `<dir>/<project>/<environment>/`.
    #[arg(long, short = 'o', default_value = ".")]
    pub output_dir: PathBuf,

    /// Post-process the environments that succeeded even when others failed.
    #[arg(long)]
    pub skip_failed: bool,

    /// Run `init` in each export so providers are vendored.
    #[arg(long)]
    pub include_providers: bool,

    /// Credentials profile.
    #[arg(long)]
    pub profile: Option<String>,

    /// Emit the summary as JSON instead of the progress board and table.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct SummaryRow {
    #[tabled(rename = "environment")]
    environment: String,
    #[tabled(rename = "id")]
    id: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
}

#[derive(Serialize)]
struct ExportAllJson {
    project: String,
    project_dir: String,
    finished_at: String,
    succeeded: usize,
    failed: usize,
    environments: Vec<EnvironmentJson>,
    post_processing: Option<PostProcessJson>,
}

#[derive(Serialize)]
struct EnvironmentJson {
    name: String,
    id: String,
    status: ExportStatus,
    deployment: Option<String>,
    detail: String,
}

#[derive(Serialize)]
struct PostProcessJson {
    flattened: Vec<String>,
    state_pushed: Vec<String>,
    modules_copied: usize,
    modules_deduplicated: usize,
    conflicts: Vec<String>,
    warnings: Vec<String>,
}

impl ExportAllArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let settings = load_settings(&home)?;
        let api = connect(&home, self.profile.as_deref(), &settings)?;
        let provisioner = Arc::new(TerraformCli::new(settings.terraform_binary.clone()).quiet(true));

        let request = ExportAllRequest {
            project: ProjectName::from(self.project.as_str()),
            output_dir: self.output_dir.clone(),
            skip_failed: self.skip_failed,
            include_providers: self.include_providers,
            poll_interval: settings.poll_interval(),
            refresh: settings.display_refresh(),
            display: if self.json {
                BoardDisplay::Hidden
            } else {
                board_display()
            },
        };
        let summary = runtime()?
            .block_on(export_all(api, provisioner, request))
            .with_context(|| format!("export-all failed for project '{}'", self.project))?;

        if self.json {
            print_json(&summary)?;
        } else {
            print_summary(&summary, self.skip_failed);
        }

        let failed = summary.failed().count();
        if failed > 0 {
            anyhow::bail!(
                "{failed} of {} environment(s) failed to export",
                summary.environments.len()
            );
        }
        Ok(())
    }
}

fn print_summary(summary: &ExportAllSummary, skip_failed: bool) {
    let separator = "═".repeat(63);
    println!();
    println!("{separator}");
    println!("Export Summary for project: {}", summary.project.to_string().bold());
    println!("{separator}");

    if summary.environments.is_empty() {
        println!("No environments found in project {}.", summary.project);
        return;
    }

    let rows: Vec<SummaryRow> = summary
        .environments
        .iter()
        .map(|env| SummaryRow {
            environment: env.environment.name.clone(),
            id: env.environment.id.to_string(),
            status: status_label(env.status),
            detail: env.detail.clone(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    let succeeded = summary.succeeded().count();
    let failed = summary.failed().count();
    println!(
        "{} succeeded, {} failed",
        succeeded.to_string().green().bold(),
        failed.to_string().red().bold()
    );
    for env in summary.failed() {
        println!(
            "  {} {} [{}]: {}",
            "✗".red(),
            env.environment.name,
            env.environment.id,
            env.detail
        );
    }

    match &summary.post_process {
        Some(report) => {
            if let Some(consolidation) = &report.consolidation {
                println!(
                    "modules: {} copied, {} deduplicated, {} conflict(s)",
                    consolidation.copied,
                    consolidation.deduplicated,
                    consolidation.conflicts.len()
                );
                for conflict in &consolidation.conflicts {
                    println!(
                        "  {} {} differs in {}; kept {}",
                        "!".yellow(),
                        conflict.relative.display(),
                        conflict.rejected_from,
                        conflict.kept_from
                    );
                }
            }
            for warning in &report.warnings {
                println!("  {} {warning}", "⚠".yellow());
            }
            if succeeded > 0 {
                println!("output: {}", summary.project_dir.display());
            }
        }
        None if failed > 0 && !skip_failed => {
            println!(
                "{}",
                "post-processing skipped; rerun with --skip-failed to consolidate the successful environments"
                    .yellow()
            );
        }
        None => {}
    }
}

fn print_json(summary: &ExportAllSummary) -> Result<()> {
    let payload = ExportAllJson {
        project: summary.project.to_string(),
        project_dir: summary.project_dir.display().to_string(),
        finished_at: Utc::now().to_rfc3339(),
        succeeded: summary.succeeded().count(),
        failed: summary.failed().count(),
        environments: summary
            .environments
            .iter()
            .map(|env| EnvironmentJson {
                name: env.environment.name.clone(),
                id: env.environment.id.to_string(),
                status: env.status,
                deployment: env.deployment.as_ref().map(ToString::to_string),
                detail: env.detail.clone(),
            })
            .collect(),
        post_processing: summary.post_process.as_ref().map(|report| {
            let consolidation = report.consolidation.as_ref();
            PostProcessJson {
                flattened: report.flattened.clone(),
                state_pushed: report.state_pushed.clone(),
                modules_copied: consolidation.map_or(0, |c| c.copied),
                modules_deduplicated: consolidation.map_or(0, |c| c.deduplicated),
                conflicts: consolidation
                    .map(|c| {
                        c.conflicts
                            .iter()
                            .map(|conflict| conflict.relative.display().to_string())
                            .collect()
                    })
                    .unwrap_or_default(),
                warnings: report.warnings.clone(),
            }
        }),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize export summary")?
    );
    Ok(())
}

fn status_label(status: ExportStatus) -> String {
    match status {
        ExportStatus::Complete => "COMPLETE".green().to_string(),
        ExportStatus::Failed => "FAILED".red().to_string(),
        other => other.to_string().to_uppercase().yellow().to_string(),
    }
}
