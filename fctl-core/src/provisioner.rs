//! The provisioning tool seam and its command-line implementation.

use std::path::Path;
use std::process::{Command, Output, Stdio};

use crate::error::WorkspaceError;
use crate::types::DeployAction;

/// How `init` treats the configured backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// Whatever backend the configuration declares (local when none).
    Default,
    /// `-backend=false`: install modules and providers only.
    NoBackend,
}

/// Result of one `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Applied,
    Planned { changes: bool },
    Destroyed,
}

/// External provisioning tool executor.
///
/// Every call blocks until the tool exits.
pub trait Provisioner: Send + Sync {
    fn init(&self, dir: &Path, mode: InitMode) -> Result<(), WorkspaceError>;

    /// Select workspace `name`, creating it when it does not exist yet.
    fn select_or_create_workspace(&self, dir: &Path, name: &str) -> Result<(), WorkspaceError>;

    fn run(
        &self,
        dir: &Path,
        action: DeployAction,
        target: Option<&str>,
    ) -> Result<RunOutcome, WorkspaceError>;

    /// Current state as the tool's JSON representation.
    fn show_state(&self, dir: &Path) -> Result<serde_json::Value, WorkspaceError>;

    /// Upload a local state file (absolute path) into the configured backend.
    fn state_push(&self, dir: &Path, state: &Path) -> Result<(), WorkspaceError>;
}

/// Runs the `terraform` binary (or a compatible one).
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: String,
    quiet: bool,
}

impl TerraformCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            quiet: false,
        }
    }

    /// Discard the tool's own output instead of passing it through.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    fn command(&self, dir: &Path, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.current_dir(dir).args(args).stdin(Stdio::null());
        if self.quiet {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }
        cmd
    }

    fn label(&self, args: &[&str]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    /// Run to completion; returns the exit code.
    fn status(&self, dir: &Path, args: &[&str]) -> Result<Option<i32>, WorkspaceError> {
        tracing::debug!("running {} in {}", self.label(args), dir.display());
        let status = self
            .command(dir, args)
            .status()
            .map_err(|e| WorkspaceError::Spawn {
                program: self.binary.clone(),
                source: e,
            })?;
        Ok(status.code())
    }

    fn checked(&self, dir: &Path, args: &[&str]) -> Result<(), WorkspaceError> {
        match self.status(dir, args)? {
            Some(0) => Ok(()),
            code => Err(WorkspaceError::Provision {
                command: self.label(args),
                code,
            }),
        }
    }

    fn captured(&self, dir: &Path, args: &[&str]) -> Result<Output, WorkspaceError> {
        let output = Command::new(&self.binary)
            .current_dir(dir)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| WorkspaceError::Spawn {
                program: self.binary.clone(),
                source: e,
            })?;
        if !output.status.success() {
            tracing::debug!("{}", String::from_utf8_lossy(&output.stderr).trim());
            return Err(WorkspaceError::Provision {
                command: self.label(args),
                code: output.status.code(),
            });
        }
        Ok(output)
    }
}

impl Default for TerraformCli {
    fn default() -> Self {
        Self::new("terraform")
    }
}

impl Provisioner for TerraformCli {
    fn init(&self, dir: &Path, mode: InitMode) -> Result<(), WorkspaceError> {
        match mode {
            InitMode::Default => self.checked(dir, &["init", "-input=false"]),
            InitMode::NoBackend => self.checked(dir, &["init", "-input=false", "-backend=false"]),
        }
    }

    fn select_or_create_workspace(&self, dir: &Path, name: &str) -> Result<(), WorkspaceError> {
        let select = ["workspace", "select", name];
        let selected = Command::new(&self.binary)
            .current_dir(dir)
            .args(select)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| WorkspaceError::Spawn {
                program: self.binary.clone(),
                source: e,
            })?;
        if selected.success() {
            return Ok(());
        }
        self.checked(dir, &["workspace", "new", name])
    }

    fn run(
        &self,
        dir: &Path,
        action: DeployAction,
        target: Option<&str>,
    ) -> Result<RunOutcome, WorkspaceError> {
        let target_arg = target.map(|t| format!("-target={t}"));
        let mut args: Vec<&str> = match action {
            DeployAction::Apply => vec!["apply", "-input=false", "-auto-approve"],
            DeployAction::Destroy => vec!["destroy", "-input=false", "-auto-approve"],
            DeployAction::Plan => vec!["plan", "-input=false", "-detailed-exitcode"],
        };
        if let Some(arg) = target_arg.as_deref() {
            args.push(arg);
        }

        match (action, self.status(dir, &args)?) {
            (DeployAction::Apply, Some(0)) => Ok(RunOutcome::Applied),
            (DeployAction::Destroy, Some(0)) => Ok(RunOutcome::Destroyed),
            (DeployAction::Plan, Some(0)) => Ok(RunOutcome::Planned { changes: false }),
            (DeployAction::Plan, Some(2)) => Ok(RunOutcome::Planned { changes: true }),
            (_, code) => Err(WorkspaceError::Provision {
                command: self.label(&args),
                code,
            }),
        }
    }

    fn show_state(&self, dir: &Path) -> Result<serde_json::Value, WorkspaceError> {
        let output = self.captured(dir, &["show", "-json"])?;
        serde_json::from_slice(&output.stdout).map_err(|e| WorkspaceError::Json {
            path: dir.to_path_buf(),
            source: e,
        })
    }

    fn state_push(&self, dir: &Path, state: &Path) -> Result<(), WorkspaceError> {
        let state = state.to_string_lossy();
        self.checked(dir, &["state", "push", &state])
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A stand-in binary that logs its arguments and exits with `code`.
    fn fake_tool(dir: &Path, code: i32, stdout: &str) -> String {
        let path = dir.join("fake-tf");
        let log = dir.join("calls.log");
        fs::write(
            &path,
            format!(
                "#!/bin/sh\necho \"$@\" >> '{}'\nprintf '%s' '{stdout}'\nexit {code}\n",
                log.display()
            ),
        )
        .unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn calls(dir: &Path) -> String {
        fs::read_to_string(dir.join("calls.log")).unwrap_or_default()
    }

    #[test]
    fn plan_exit_two_means_changes() {
        let tmp = TempDir::new().expect("tempdir");
        let tool = TerraformCli::new(fake_tool(tmp.path(), 2, "")).quiet(true);
        let outcome = tool
            .run(tmp.path(), DeployAction::Plan, Some("module.level2.module.db"))
            .unwrap();
        assert_eq!(outcome, RunOutcome::Planned { changes: true });
        assert!(calls(tmp.path()).contains("-target=module.level2.module.db"));
    }

    #[test]
    fn apply_failure_reports_exit_code() {
        let tmp = TempDir::new().expect("tempdir");
        let tool = TerraformCli::new(fake_tool(tmp.path(), 1, "")).quiet(true);
        let err = tool.run(tmp.path(), DeployAction::Apply, None).unwrap_err();
        assert!(matches!(err, WorkspaceError::Provision { code: Some(1), .. }));
    }

    #[test]
    fn show_state_parses_json() {
        let tmp = TempDir::new().expect("tempdir");
        let tool = TerraformCli::new(fake_tool(tmp.path(), 0, r#"{"format_version":"1.0"}"#));
        let state = tool.show_state(tmp.path()).unwrap();
        assert_eq!(state["format_version"], "1.0");
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let tmp = TempDir::new().expect("tempdir");
        let tool = TerraformCli::new(tmp.path().join("nope").to_string_lossy().into_owned());
        let err = tool.init(tmp.path(), InitMode::NoBackend).unwrap_err();
        assert!(matches!(err, WorkspaceError::Spawn { .. }));
    }
}
