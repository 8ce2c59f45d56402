//! `fctl clean <dir>` — run the sanitizer over an exported tree.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

/// Arguments for `fctl clean`.
#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Extracted export directory.
    pub dir: PathBuf,

    /// Print the changes as unified diffs without writing anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl CleanArgs {
    pub fn run(self) -> Result<()> {
        let plan = fctl_sanitize::plan(&self.dir)
            .with_context(|| format!("failed to scan {}", self.dir.display()))?;

        if self.dry_run {
            if plan.is_empty() {
                println!("[dry-run] ✓ {} is already clean", self.dir.display());
            } else {
                print!("{}", plan.render_diff());
                println!("[dry-run] {} change(s) would be made", plan.changes.len());
            }
            for warning in &plan.warnings {
                println!("  {} {warning}", "⚠".yellow());
            }
            return Ok(());
        }

        let report = plan
            .apply()
            .with_context(|| format!("failed to clean {}", self.dir.display()))?;
        if report.is_clean() {
            println!("✓ {} is already clean", self.dir.display());
        } else {
            println!(
                "✓ cleaned {} ({} rewritten, {} deleted)",
                self.dir.display(),
                report.rewritten.len(),
                report.deleted.len()
            );
        }
        for warning in &report.warnings {
            println!("  {} {warning}", "⚠".yellow());
        }
        Ok(())
    }
}
