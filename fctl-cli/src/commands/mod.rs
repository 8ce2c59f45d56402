pub mod clean;
pub mod deploy;
pub mod export;
pub mod export_all;
pub mod repackage;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use fctl_core::{credentials, settings, Settings};
use fctl_export::{BoardDisplay, HttpRemote, RemoteJobApi};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn load_settings(home: &Path) -> Result<Settings> {
    settings::load_at(home).context("failed to load fctl settings")
}

/// Control plane client for the selected profile.
pub(crate) fn connect(
    home: &Path,
    profile: Option<&str>,
    settings: &Settings,
) -> Result<Arc<dyn RemoteJobApi>> {
    let profile = credentials::load_at(home, profile, settings.profile.as_deref())
        .context("failed to load credentials")?;
    tracing::debug!(profile = %profile.name, url = %profile.control_plane_url, "using profile");
    Ok(Arc::new(HttpRemote::from_profile(&profile)?))
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

/// Redraw the board in place on a terminal, print it once otherwise.
pub(crate) fn board_display() -> BoardDisplay {
    if std::io::stdout().is_terminal() {
        BoardDisplay::Live
    } else {
        BoardDisplay::Final
    }
}
