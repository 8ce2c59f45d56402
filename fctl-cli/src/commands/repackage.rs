//! `fctl repackage` — replace a directory inside an artifact.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Args};

use fctl_core::archive;

/// Arguments for `fctl repackage`.
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("destination_zip").required(true).args(["output", "inplace"])))]
pub struct RepackageArgs {
    /// Artifact to repackage.
    #[arg(long, short = 'z')]
    pub zip: PathBuf,

    /// Local directory whose contents go into the artifact.
    #[arg(long, short = 's')]
    pub source: PathBuf,

    /// Path inside the artifact to replace (e.g. `tfexport/modules/db`).
    #[arg(long, short = 'd')]
    pub destination: String,

    /// Write the result to a new artifact.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Overwrite the input artifact.
    #[arg(long)]
    pub inplace: bool,
}

impl RepackageArgs {
    pub fn run(self) -> Result<()> {
        if !self.source.is_dir() {
            anyhow::bail!("source {} is not a directory", self.source.display());
        }
        let output = match (&self.output, self.inplace) {
            (Some(path), _) => path.clone(),
            (None, _) => self.zip.clone(),
        };
        let count = archive::replace_subtree(&self.zip, &self.source, &self.destination, &output)
            .with_context(|| format!("failed to repackage {}", self.zip.display()))?;
        println!(
            "✓ replaced '{}' with {count} file(s) from {} → {}",
            self.destination,
            self.source.display(),
            output.display()
        );
        Ok(())
    }
}
