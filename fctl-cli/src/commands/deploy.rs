//! `fctl apply|plan|destroy` — run the provisioning tool against an artifact.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use fctl_core::{
    deploy, BackendConfig, BackendKind, Collaborators, DeployAction, DeployOutcome,
    DeployRequest, DeploymentId, RunOutcome, Settings, StateChoice, StateChooser, StateSource,
    TerraformCli, WorkspaceError,
};
use fctl_sanitize::LifecycleRewriter;

use super::{home, load_settings};

/// Arguments for `fctl apply`, `fctl plan` and `fctl destroy`.
#[derive(Args, Debug)]
pub struct DeployArgs {
    /// Exported artifact (`<deployment>.zip`).
    #[arg(long, short = 'z')]
    pub zip: PathBuf,

    #[command(flatten)]
    pub opts: DeployOpts,
}

/// Options shared with `fctl export --apply|--plan|--destroy`.
#[derive(Args, Debug, Clone, Default)]
pub struct DeployOpts {
    /// Limit the run to one resource address (`-target`).
    #[arg(long)]
    pub target: Option<String>,

    /// Remote state backend configured from `TF_BACKEND_<TYPE>_*` variables.
    #[arg(long, value_name = "s3|gcs")]
    pub backend: Option<BackendKind>,

    /// Start from this state file instead of a carried-forward one.
    #[arg(long, conflicts_with = "backend")]
    pub state_file: Option<PathBuf>,

    /// Set `prevent_destroy = false` on every resource before running.
    #[arg(long)]
    pub allow_destroy: bool,
}

impl DeployArgs {
    pub fn run(self, action: DeployAction) -> Result<()> {
        let home = home()?;
        let settings = load_settings(&home)?;
        run_deploy(&home, &settings, self.zip, action, &self.opts)
    }
}

/// Deploy flow with the real tool and an interactive state prompt.
pub(crate) fn run_deploy(
    home: &Path,
    settings: &Settings,
    artifact: PathBuf,
    action: DeployAction,
    opts: &DeployOpts,
) -> Result<()> {
    let backend = opts
        .backend
        .map(BackendConfig::from_env)
        .transpose()
        .context("invalid backend configuration")?;

    let mut req = DeployRequest::new(&artifact, action);
    req.target = opts.target.clone();
    req.backend = backend;
    req.state_file = opts.state_file.clone();
    req.allow_destroy = opts.allow_destroy;
    req.retention = settings.retention;

    let tool = TerraformCli::new(settings.terraform_binary.clone());
    let stdin = io::stdin();
    let mut chooser = PromptChooser::new(stdin.lock(), io::stdout());
    let outcome = deploy::run_at(
        home,
        &req,
        Collaborators {
            provisioner: &tool,
            chooser: &mut chooser,
            rewriter: &LifecycleRewriter,
        },
    )
    .with_context(|| format!("{action} failed for {}", artifact.display()))?;

    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &DeployOutcome) {
    match outcome.state {
        StateSource::Explicit(ref path) => println!("state: {}", path.display()),
        StateSource::Latest(ref path) => println!("state: latest ({})", path.display()),
        StateSource::Backend => println!("state: remote backend"),
        StateSource::Workspace => {}
    }
    let line = match outcome.run {
        RunOutcome::Applied => format!("✓ applied {}", outcome.deployment),
        RunOutcome::Planned { changes: true } => format!("✓ plan for {} has changes", outcome.deployment),
        RunOutcome::Planned { changes: false } => format!("✓ no changes for {}", outcome.deployment),
        RunOutcome::Destroyed => format!("✓ destroyed {}", outcome.deployment),
    };
    println!("{}", line.green());
    println!("workspace: {}", outcome.workspace.root.display());
    if let Some(path) = &outcome.release_metadata {
        println!("release metadata: {}", path.display());
    }
    if !outcome.pruned.removed_deployments.is_empty() {
        println!(
            "pruned {} old deployment(s) of {}",
            outcome.pruned.removed_deployments.len(),
            outcome.environment
        );
    }
}

// ---------------------------------------------------------------------------
// State prompt
// ---------------------------------------------------------------------------

/// Asks which earlier snapshot a new workspace should start from.
///
/// Enter takes the latest snapshot and `y` lists earlier deployments to pick
/// from. Any other answer starts fresh; end of input counts as Enter.
pub struct PromptChooser<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> PromptChooser<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn read_line(&mut self) -> Result<String, WorkspaceError> {
        self.output.flush().map_err(stdio_err)?;
        let mut line = String::new();
        self.input.read_line(&mut line).map_err(stdio_err)?;
        Ok(line.trim().to_string())
    }

    fn say(&mut self, text: &str) -> Result<(), WorkspaceError> {
        writeln!(self.output, "{text}").map_err(stdio_err)
    }
}

impl<R: BufRead, W: Write> StateChooser for PromptChooser<R, W> {
    fn choose(
        &mut self,
        candidates: &[DeploymentId],
        latest: Option<&Path>,
    ) -> Result<StateChoice, WorkspaceError> {
        if candidates.is_empty() && latest.is_none() {
            return Ok(StateChoice::Fresh);
        }
        match latest {
            Some(path) => self.say(&format!("Latest state: {}", path.display()))?,
            None => self.say("No latest state for this environment.")?,
        }
        write!(
            self.output,
            "Enter to use the latest state, 'y' to choose an earlier deployment, anything else to start fresh: "
        )
        .map_err(stdio_err)?;

        let answer = self.read_line()?;
        match answer.as_str() {
            "" => Ok(match (latest, candidates.last()) {
                (Some(_), _) => StateChoice::Latest,
                (None, Some(newest)) => StateChoice::Deployment(newest.clone()),
                (None, None) => StateChoice::Fresh,
            }),
            "y" | "Y" => self.pick(candidates),
            _ => Ok(StateChoice::Fresh),
        }
    }
}

impl<R: BufRead, W: Write> PromptChooser<R, W> {
    fn pick(&mut self, candidates: &[DeploymentId]) -> Result<StateChoice, WorkspaceError> {
        if candidates.is_empty() {
            self.say("No earlier deployments; starting fresh.")?;
            return Ok(StateChoice::Fresh);
        }
        // newest first
        for (index, deployment) in candidates.iter().rev().enumerate() {
            self.say(&format!("  {}. {deployment}", index + 1))?;
        }
        write!(self.output, "Deployment number: ").map_err(stdio_err)?;
        let answer = self.read_line()?;
        let picked = answer
            .parse::<usize>()
            .ok()
            .filter(|n| (1..=candidates.len()).contains(n))
            .ok_or_else(|| WorkspaceError::Config(format!("invalid selection '{answer}'")))?;
        Ok(StateChoice::Deployment(
            candidates[candidates.len() - picked].clone(),
        ))
    }
}

fn stdio_err(source: io::Error) -> WorkspaceError {
    WorkspaceError::Io {
        path: PathBuf::from("<stdin>"),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ids() -> Vec<DeploymentId> {
        vec![DeploymentId::from("old"), DeploymentId::from("new")]
    }

    fn choose(input: &str, latest: Option<&Path>) -> Result<StateChoice, WorkspaceError> {
        let mut chooser = PromptChooser::new(Cursor::new(input.to_string()), Vec::new());
        chooser.choose(&ids(), latest)
    }

    #[test]
    fn enter_or_eof_takes_latest() {
        let latest = PathBuf::from("/h/.facets/env/tf.tfstate");
        assert_eq!(choose("\n", Some(&latest)).expect("choice"), StateChoice::Latest);
        assert_eq!(choose("", Some(&latest)).expect("choice"), StateChoice::Latest);
        assert_eq!(
            choose("", None).expect("choice"),
            StateChoice::Deployment(DeploymentId::from("new"))
        );
    }

    #[test]
    fn y_then_number_picks_newest_first_listing() {
        assert_eq!(
            choose("y\n2\n", None).expect("choice"),
            StateChoice::Deployment(DeploymentId::from("old"))
        );
        assert!(choose("y\n7\n", None).is_err());
    }

    #[test]
    fn anything_else_starts_fresh() {
        assert_eq!(choose("n\n", None).expect("choice"), StateChoice::Fresh);
        let mut chooser = PromptChooser::new(Cursor::new(String::new()), Vec::new());
        assert_eq!(chooser.choose(&[], None).expect("choice"), StateChoice::Fresh);
    }
}
