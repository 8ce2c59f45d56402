//! `fctl export` — export one environment to a cleaned artifact.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use fctl_core::{archive, format_duration, DeployAction, Environment, EnvironmentId, TerraformCli};
use fctl_export::{export_one, remote, ExportTarget, RemoteJobApi};

use super::deploy::{run_deploy, DeployOpts};
use super::{board_display, connect, home, load_settings, runtime};

/// Arguments for `fctl export`.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Environment (cluster) id to export.
    #[arg(long, short = 'e', conflicts_with_all = ["project", "env_name"], required_unless_present = "project")]
    pub env_id: Option<String>,

    /// Project (stack) of the environment, with `--env-name`.
    #[arg(long, short = 'p', requires = "env_name")]
    pub project: Option<String>,

    /// Environment name within `--project`.
    #[arg(long, requires = "project")]
    pub env_name: Option<String>,

    /// Directory receiving `<deployment>.zip`.
    #[arg(long, short = 'o', default_value = ".")]
    pub output: PathBuf,

    /// Run `init` before packaging so providers ship inside the artifact.
    #[arg(long)]
    pub include_providers: bool,

    /// Copy a local file or directory into the artifact (`source:destination`).
    #[arg(long = "copy", value_name = "SRC:DST")]
    pub copies: Vec<CopyPair>,

    /// Apply the artifact after exporting it.
    #[arg(long, conflicts_with_all = ["plan", "destroy"])]
    pub apply: bool,

    /// Plan the artifact after exporting it.
    #[arg(long, conflicts_with = "destroy")]
    pub plan: bool,

    /// Destroy the artifact's resources after exporting it.
    #[arg(long)]
    pub destroy: bool,

    #[command(flatten)]
    pub deploy: DeployOpts,

    /// Credentials profile.
    #[arg(long)]
    pub profile: Option<String>,
}

/// `--copy source:destination`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyPair {
    pub source: PathBuf,
    pub destination: String,
}

impl FromStr for CopyPair {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((source, destination)) if !source.is_empty() && !destination.is_empty() => {
                Ok(Self {
                    source: PathBuf::from(source),
                    destination: destination.to_string(),
                })
            }
            Some(_) => Err(format!(
                "invalid --copy value: {s} (source and destination required)"
            )),
            None => Err(format!(
                "invalid --copy value: {s} (expected format source:destination)"
            )),
        }
    }
}

impl ExportArgs {
    fn action(&self) -> Option<DeployAction> {
        if self.apply {
            Some(DeployAction::Apply)
        } else if self.plan {
            Some(DeployAction::Plan)
        } else if self.destroy {
            Some(DeployAction::Destroy)
        } else {
            None
        }
    }

    pub fn run(self) -> Result<()> {
        let home = home()?;
        let settings = load_settings(&home)?;
        let api = connect(&home, self.profile.as_deref(), &settings)?;
        let env = self.resolve(api.as_ref())?;

        match api.exports(&env.id).map(|exports| remote::estimate(&exports)) {
            Ok(Some(estimate)) => println!(
                "⏱  Estimated export time: ~{} (average of recent exports)",
                format_duration(estimate)
            ),
            Ok(None) => {}
            Err(err) => tracing::debug!(env = %env.id, error = %err, "no export estimate"),
        }

        let provisioner = Arc::new(TerraformCli::new(settings.terraform_binary.clone()).quiet(true));
        let target = ExportTarget::Archive {
            output_dir: self.output.clone(),
            include_providers: self.include_providers,
        };
        let outcome = runtime()?
            .block_on(export_one(
                api,
                provisioner,
                env.clone(),
                target,
                settings.poll_interval(),
                settings.display_refresh(),
                board_display(),
            ))
            .with_context(|| format!("export failed for environment {}", env.name))?;

        if !self.copies.is_empty() {
            let pairs: Vec<(PathBuf, String)> = self
                .copies
                .iter()
                .map(|c| (c.source.clone(), c.destination.clone()))
                .collect();
            archive::add_files(&outcome.path, &pairs)
                .with_context(|| format!("failed to copy files into {}", outcome.path.display()))?;
        }

        let message = format!(
            "✓ exported {} ({}) to {}",
            env.name,
            outcome.deployment,
            outcome.path.display()
        );
        println!("{}", message.green());

        if let Some(action) = self.action() {
            run_deploy(&home, &settings, outcome.path, action, &self.deploy)?;
        }
        Ok(())
    }

    fn resolve(&self, api: &dyn RemoteJobApi) -> Result<Environment> {
        if let Some(id) = &self.env_id {
            return Ok(Environment::new(EnvironmentId::from(id.as_str()), id.clone()));
        }
        let (Some(project), Some(name)) = (&self.project, &self.env_name) else {
            anyhow::bail!("provide --env-id, or --project with --env-name");
        };
        remote::resolve_environment(api, &project.as_str().into(), name)
            .with_context(|| format!("could not find environment '{name}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_pair_splits_on_first_colon() {
        let pair: CopyPair = "certs/ca.pem:tfexport/ca.pem".parse().expect("pair");
        assert_eq!(pair.source, PathBuf::from("certs/ca.pem"));
        assert_eq!(pair.destination, "tfexport/ca.pem");

        let pair: CopyPair = "a:b:c".parse().expect("pair");
        assert_eq!(pair.destination, "b:c");
    }

    #[test]
    fn copy_pair_rejects_missing_parts() {
        assert!("nocolon".parse::<CopyPair>().is_err());
        assert!(":dst".parse::<CopyPair>().is_err());
        assert!("src:".parse::<CopyPair>().is_err());
    }
}
