//! `~/.facets/fctl.yaml`: optional local settings.
//!
//! Every field has a default; a missing file is equivalent to an empty one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, WorkspaceError};
use crate::retention::DEFAULT_KEEP;
use crate::workspace;

pub const SETTINGS_FILE: &str = "fctl.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds between remote job status polls.
    pub poll_interval_secs: u64,
    /// Milliseconds between live status board redraws.
    pub display_refresh_ms: u64,
    /// Deployments and artifacts kept per environment.
    pub retention: usize,
    pub terraform_binary: String,
    /// Profile used when `--profile` is not given.
    pub profile: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            display_refresh_ms: 500,
            retention: DEFAULT_KEEP,
            terraform_binary: "terraform".to_string(),
            profile: None,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn display_refresh(&self) -> Duration {
        Duration::from_millis(self.display_refresh_ms.max(50))
    }
}

/// `<home>/.facets/fctl.yaml` — pure, no I/O.
pub fn settings_path_at(home: &Path) -> PathBuf {
    workspace::base_dir_at(home).join(SETTINGS_FILE)
}

/// Load settings, falling back to defaults when the file does not exist.
///
/// Returns `WorkspaceError::Parse` (with path) for malformed YAML.
pub fn load_at(home: &Path) -> Result<Settings, WorkspaceError> {
    let path = settings_path_at(home);
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(Settings::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| WorkspaceError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Settings, WorkspaceError> {
    load_at(&workspace::home()?)
}
