//! Profiles and credentials (read-only).
//!
//! ```text
//! ~/.facets/config        [default] profile = <name>
//! ~/.facets/credentials   [<name>] control_plane_url, username, token, token_expiry
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{io_err, WorkspaceError};
use crate::workspace;

pub const DEFAULT_PROFILE: &str = "default";

/// Control plane access for one profile.
#[derive(Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub control_plane_url: String,
    pub username: String,
    pub token: String,
    pub token_expiry: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("control_plane_url", &self.control_plane_url)
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

impl Profile {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expiry.is_some_and(|expiry| now > expiry)
    }
}

/// `<home>/.facets/config`
pub fn config_path_at(home: &Path) -> PathBuf {
    workspace::base_dir_at(home).join("config")
}

/// `<home>/.facets/credentials`
pub fn credentials_path_at(home: &Path) -> PathBuf {
    workspace::base_dir_at(home).join("credentials")
}

/// Profile name to use: explicit, then `preferred`, then the config default, then `default`.
pub fn resolve_profile_name_at(
    home: &Path,
    explicit: Option<&str>,
    preferred: Option<&str>,
) -> Result<String, WorkspaceError> {
    if let Some(name) = explicit.or(preferred).filter(|n| !n.is_empty()) {
        return Ok(name.to_string());
    }
    let path = config_path_at(home);
    if path.exists() {
        let config = read_ini(&path)?;
        if let Some(name) = config
            .get(DEFAULT_PROFILE)
            .and_then(|s| s.get("profile"))
            .filter(|n| !n.is_empty())
        {
            return Ok(name.clone());
        }
    }
    Ok(DEFAULT_PROFILE.to_string())
}

/// Load and validate `name` from the credentials file.
///
/// An expired token is an error asking the user to log in again.
pub fn load_profile_at(home: &Path, name: &str) -> Result<Profile, WorkspaceError> {
    let path = credentials_path_at(home);
    if !path.exists() {
        return Err(WorkspaceError::Config(format!(
            "no credentials file at {}; log in first",
            path.display()
        )));
    }
    let sections = read_ini(&path)?;
    let section = sections.get(name).ok_or_else(|| {
        WorkspaceError::Config(format!("profile '{name}' not found in {}", path.display()))
    })?;

    let field = |key: &str| section.get(key).cloned().unwrap_or_default();
    let profile = Profile {
        name: name.to_string(),
        control_plane_url: field("control_plane_url"),
        username: field("username"),
        token: field("token"),
        token_expiry: parse_expiry(name, section.get("token_expiry"))?,
    };
    if profile.control_plane_url.is_empty() || profile.username.is_empty() || profile.token.is_empty()
    {
        return Err(WorkspaceError::Config(format!(
            "profile '{name}' is missing one of control_plane_url, username, or token"
        )));
    }
    if profile.is_expired(Utc::now()) {
        return Err(WorkspaceError::Config(format!(
            "token for profile '{name}' has expired; log in again"
        )));
    }
    Ok(profile)
}

/// Resolve the profile name and load it.
pub fn load_at(
    home: &Path,
    explicit: Option<&str>,
    preferred: Option<&str>,
) -> Result<Profile, WorkspaceError> {
    let name = resolve_profile_name_at(home, explicit, preferred)?;
    load_profile_at(home, &name)
}

/// `load_at` convenience wrapper.
pub fn load(explicit: Option<&str>, preferred: Option<&str>) -> Result<Profile, WorkspaceError> {
    load_at(&workspace::home()?, explicit, preferred)
}

fn parse_expiry(
    profile: &str,
    raw: Option<&String>,
) -> Result<Option<DateTime<Utc>>, WorkspaceError> {
    match raw.map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| {
                WorkspaceError::Config(format!(
                    "could not parse token_expiry for profile '{profile}': {e}"
                ))
            }),
    }
}

type Sections = HashMap<String, HashMap<String, String>>;

fn read_ini(path: &Path) -> Result<Sections, WorkspaceError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(parse_ini(&contents))
}

/// `[section]` headers and `key = value` pairs; `#`/`;` comment lines.
fn parse_ini(contents: &str) -> Sections {
    let mut sections = Sections::new();
    let mut current = DEFAULT_PROFILE.to_string();
    for line in contents.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            current = name.trim().to_string();
            sections.entry(current.clone()).or_default();
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"');
            sections
                .entry(current.clone())
                .or_default()
                .insert(key.trim().to_string(), value.to_string());
        }
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::fs;
    use tempfile::TempDir;

    fn write(home: &Path, name: &str, body: &str) {
        let base = workspace::base_dir_at(home);
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join(name), body).unwrap();
    }

    #[test]
    fn parses_sections_and_comments() {
        let parsed = parse_ini("# c\n[a]\nx = 1\n; c\n[b]\ny=\"two\"\n");
        assert_eq!(parsed["a"]["x"], "1");
        assert_eq!(parsed["b"]["y"], "two");
    }

    #[test]
    fn profile_resolution_order() {
        let home = TempDir::new().expect("tempdir");
        assert_eq!(resolve_profile_name_at(home.path(), None, None).unwrap(), "default");

        write(home.path(), "config", "[default]\nprofile = team\n");
        assert_eq!(resolve_profile_name_at(home.path(), None, None).unwrap(), "team");
        assert_eq!(
            resolve_profile_name_at(home.path(), None, Some("pref")).unwrap(),
            "pref"
        );
        assert_eq!(
            resolve_profile_name_at(home.path(), Some("flag"), Some("pref")).unwrap(),
            "flag"
        );
    }

    #[test]
    fn loads_complete_profile() {
        let home = TempDir::new().expect("tempdir");
        let expiry = (Utc::now() + Duration::days(1)).to_rfc3339();
        write(
            home.path(),
            "credentials",
            &format!(
                "[team]\ncontrol_plane_url = https://cp.example.com\nusername = ops\ntoken = t0k\ntoken_expiry = {expiry}\n"
            ),
        );
        let profile = load_profile_at(home.path(), "team").unwrap();
        assert_eq!(profile.control_plane_url, "https://cp.example.com");
        assert!(!format!("{profile:?}").contains("t0k"));
    }

    #[test]
    fn expired_token_is_rejected() {
        let home = TempDir::new().expect("tempdir");
        let expiry = (Utc::now() - Duration::days(1)).to_rfc3339();
        write(
            home.path(),
            "credentials",
            &format!("[default]\ncontrol_plane_url = u\nusername = a\ntoken = b\ntoken_expiry = {expiry}\n"),
        );
        let err = load_profile_at(home.path(), "default").unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn incomplete_profile_is_rejected() {
        let home = TempDir::new().expect("tempdir");
        write(home.path(), "credentials", "[default]\nusername = a\n");
        let err = load_profile_at(home.path(), "default").unwrap_err();
        assert!(err.to_string().contains("missing one of"));
    }
}
