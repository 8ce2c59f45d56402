//! Remote state backend configuration, read from `TF_BACKEND_<TYPE>_<VAR>` variables.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::json;

use crate::error::{io_err, WorkspaceError};

pub const BACKEND_FILE: &str = "backend.tf.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    S3,
    Gcs,
}

impl BackendKind {
    /// Variables read from the environment.
    pub fn variables(self) -> &'static [&'static str] {
        match self {
            BackendKind::S3 => &[
                "bucket",
                "key",
                "region",
                "access_key",
                "secret_key",
                "dynamodb_table",
                "endpoint",
                "session_token",
            ],
            BackendKind::Gcs => &["bucket", "prefix", "credentials"],
        }
    }

    pub fn required(self) -> &'static [&'static str] {
        match self {
            BackendKind::S3 => &["bucket", "key", "region"],
            BackendKind::Gcs => &["bucket", "prefix"],
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::S3 => write!(f, "s3"),
            BackendKind::Gcs => write!(f, "gcs"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = WorkspaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(BackendKind::S3),
            "gcs" => Ok(BackendKind::Gcs),
            other => Err(WorkspaceError::Config(format!(
                "unsupported backend type: {other}"
            ))),
        }
    }
}

/// A validated backend: kind plus the variables found for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub vars: BTreeMap<String, String>,
}

impl BackendConfig {
    /// Collect `TF_BACKEND_<KIND>_<VAR>` values through `lookup` and validate them.
    pub fn from_lookup<F>(kind: BackendKind, lookup: F) -> Result<Self, WorkspaceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = format!("TF_BACKEND_{}_", kind.to_string().to_uppercase());
        let vars: BTreeMap<String, String> = kind
            .variables()
            .iter()
            .filter_map(|var| {
                lookup(&format!("{prefix}{}", var.to_uppercase()))
                    .filter(|v| !v.is_empty())
                    .map(|v| (var.to_string(), v))
            })
            .collect();
        let config = Self { kind, vars };
        config.validate()?;
        Ok(config)
    }

    /// `from_lookup` against the process environment.
    pub fn from_env(kind: BackendKind) -> Result<Self, WorkspaceError> {
        Self::from_lookup(kind, |name| std::env::var(name).ok())
    }

    pub fn validate(&self) -> Result<(), WorkspaceError> {
        let missing: Vec<&str> = self
            .kind
            .required()
            .iter()
            .copied()
            .filter(|var| !self.vars.contains_key(*var))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(WorkspaceError::Config(format!(
                "missing required backend variables: {}",
                missing.join(", ")
            )))
        }
    }

    /// `{"terraform":{"backend":{"<kind>":{...}}}}`
    pub fn to_json(&self) -> serde_json::Value {
        let mut backend = serde_json::Map::new();
        backend.insert(self.kind.to_string(), json!(self.vars));
        json!({ "terraform": { "backend": backend } })
    }

    /// Write `backend.tf.json` into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, WorkspaceError> {
        let path = dir.join(BACKEND_FILE);
        let body = serde_json::to_string_pretty(&self.to_json()).map_err(|e| WorkspaceError::Json {
            path: path.clone(),
            source: e,
        })?;
        std::fs::write(&path, body).map_err(|e| io_err(&path, e))?;
        Ok(path)
    }
}
