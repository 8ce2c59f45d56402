//! fctl — export, clean and apply control plane infrastructure exports locally.
//!
//! # Usage
//!
//! ```text
//! fctl export (--env-id <id> | --project <name> --env-name <name>) [-o <dir>] [--include-providers]
//!             [--copy <src:dst>]... [--apply | --plan | --destroy]
//! fctl export-all --project <name> [-o <dir>] [--skip-failed] [--include-providers] [--json]
//! fctl apply|plan|destroy --zip <artifact> [--target <addr>] [--backend s3|gcs]
//!             [--state-file <path>] [--allow-destroy]
//! fctl repackage --zip <artifact> --source <dir> --destination <path> (--output <zip> | --inplace)
//! fctl clean <dir> [--dry-run]
//! ```

mod commands;

use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::{
    clean::CleanArgs, deploy::DeployArgs, export::ExportArgs, export_all::ExportAllArgs,
    repackage::RepackageArgs,
};
use fctl_core::DeployAction;
use fctl_export::{ExportError, RemoteJobError};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "fctl",
    version,
    about = "Export, clean and apply control plane infrastructure exports",
    long_about = None,
)]
struct Cli {
    /// Increase log output (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Export one environment to a cleaned artifact.
    Export(ExportArgs),

    /// Export every environment of a project and consolidate their modules.
    ExportAll(ExportAllArgs),

    /// Apply an exported artifact.
    Apply(DeployArgs),

    /// Plan an exported artifact.
    Plan(DeployArgs),

    /// Destroy the resources of an exported artifact.
    Destroy(DeployArgs),

    /// Replace a directory inside an artifact.
    Repackage(RepackageArgs),

    /// Sanitize an exported configuration tree in place.
    Clean(CleanArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    fctl_export::init_tracing(match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    });

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if is_unavailable(&err) {
                eprintln!("{}", RemoteJobError::ServiceUnavailable);
            } else {
                eprintln!("Error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Export(args) => args.run(),
        Commands::ExportAll(args) => args.run(),
        Commands::Apply(args) => args.run(DeployAction::Apply),
        Commands::Plan(args) => args.run(DeployAction::Plan),
        Commands::Destroy(args) => args.run(DeployAction::Destroy),
        Commands::Repackage(args) => args.run(),
        Commands::Clean(args) => args.run(),
    }
}

/// A 503 anywhere in the chain is reported as one retry-later line.
fn is_unavailable(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RemoteJobError>(),
            Some(RemoteJobError::ServiceUnavailable)
        ) || matches!(
            cause.downcast_ref::<ExportError>(),
            Some(ExportError::Remote(RemoteJobError::ServiceUnavailable))
        )
    })
}
