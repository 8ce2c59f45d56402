//! `RemoteJobApi` over the control plane's HTTP API (blocking `ureq`).

use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use fctl_core::credentials::Profile;
use fctl_core::{
    DeploymentId, Environment, EnvironmentId, ExportJob, ProjectName, RemoteJobStatus,
};

use crate::error::RemoteJobError;
use crate::remote::{Download, RemoteExport, RemoteJobApi, UNNAMED_ENVIRONMENT};

const EXPORT_RELEASE_TYPE: &str = "TERRAFORM_EXPORT";
const NOT_RUNNING: &str =
    "Cannot trigger terraform export on an environment that is not in a running state";
const REJECTED_FALLBACK: &str = "Cannot trigger terraform export on this environment";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StackDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ClusterDto {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeploymentListDto {
    #[serde(default)]
    deployments: Vec<DeploymentDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentDto {
    id: String,
    #[serde(default)]
    release_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    created_on: Option<Value>,
    #[serde(default, rename = "timeTakenInSeconds")]
    time_taken_secs: Option<u64>,
    #[serde(default)]
    error_logs: Vec<ErrorLogDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorLogDto {
    #[serde(default)]
    error_message: Option<String>,
}

impl DeploymentDto {
    fn status(&self) -> RemoteJobStatus {
        let detail = self
            .error_logs
            .iter()
            .find_map(|log| log.error_message.clone())
            .filter(|m| !m.is_empty());
        RemoteJobStatus::from_remote(self.status.as_deref().unwrap_or_default(), detail)
    }

    fn created_on(&self) -> Option<DateTime<Utc>> {
        self.created_on.as_ref().and_then(parse_timestamp)
    }
}

/// `createdOn` arrives as epoch milliseconds or as an RFC 3339 string.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Control plane client authenticated with a profile's basic credentials.
pub struct HttpRemote {
    agent: ureq::Agent,
    base: Url,
    authorization: String,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn from_profile(profile: &Profile) -> Result<Self, RemoteJobError> {
        let base = Url::parse(&profile.control_plane_url).map_err(|e| {
            RemoteJobError::Transport {
                url: profile.control_plane_url.clone(),
                message: e.to_string(),
            }
        })?;
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", profile.username, profile.token));
        Ok(Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(CONNECT_TIMEOUT)
                .build(),
            base,
            authorization: format!("Basic {token}"),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteJobError> {
        self.base
            .join(path)
            .map_err(|e| RemoteJobError::Transport {
                url: format!("{}{path}", self.base),
                message: e.to_string(),
            })
    }

    fn get(&self, url: &Url) -> ureq::Request {
        self.agent
            .get(url.as_str())
            .set("Authorization", &self.authorization)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteJobError> {
        let url = self.endpoint(path)?;
        let response = self
            .get(&url)
            .set("Accept", "application/json")
            .call()
            .map_err(|e| map_error(url.as_str(), e))?;
        response
            .into_json::<T>()
            .map_err(|e| RemoteJobError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

impl RemoteJobApi for HttpRemote {
    fn projects(&self) -> Result<Vec<ProjectName>, RemoteJobError> {
        let stacks: Vec<StackDto> = self.get_json("/cc-ui/v1/stacks/")?;
        Ok(stacks.into_iter().map(|s| ProjectName(s.name)).collect())
    }

    fn environments(&self, project: &ProjectName) -> Result<Vec<Environment>, RemoteJobError> {
        let clusters: Vec<ClusterDto> =
            self.get_json(&format!("/cc-ui/v1/stacks/{project}/clusters"))?;
        Ok(clusters
            .into_iter()
            .map(|c| {
                let name = c
                    .name
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| UNNAMED_ENVIRONMENT.to_string());
                Environment::new(c.id, name)
            })
            .collect())
    }

    fn exports(&self, env: &EnvironmentId) -> Result<Vec<RemoteExport>, RemoteJobError> {
        let list: DeploymentListDto =
            self.get_json(&format!("/cc-ui/v1/clusters/{env}/deployments"))?;
        Ok(list
            .deployments
            .into_iter()
            .filter(|d| d.release_type.as_deref() == Some(EXPORT_RELEASE_TYPE))
            .map(|d| RemoteExport {
                status: d.status(),
                created_on: d.created_on(),
                time_taken_secs: d.time_taken_secs,
                id: DeploymentId(d.id),
            })
            .collect())
    }

    fn trigger(&self, env: &EnvironmentId) -> Result<ExportJob, RemoteJobError> {
        let url = self.endpoint(&format!(
            "/cc-ui/v1/clusters/{env}/deployments/terraform-export"
        ))?;
        let response = match self
            .agent
            .post(url.as_str())
            .set("Authorization", &self.authorization)
            .set("Accept", "application/json")
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(400, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(classify_rejection(&body));
            }
            Err(e) => return Err(map_error(url.as_str(), e)),
        };
        let dto: DeploymentDto = response.into_json().map_err(|e| RemoteJobError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = dto.status();
        if status != RemoteJobStatus::InProgress {
            return Err(RemoteJobError::Rejected(format!(
                "Failed to trigger export (status: {status})"
            )));
        }
        Ok(ExportJob {
            environment: env.clone(),
            started_at: dto.created_on().unwrap_or_else(Utc::now),
            id: DeploymentId(dto.id),
            status,
        })
    }

    fn status(
        &self,
        env: &EnvironmentId,
        job: &DeploymentId,
    ) -> Result<RemoteJobStatus, RemoteJobError> {
        let dto: DeploymentDto =
            self.get_json(&format!("/cc-ui/v1/clusters/{env}/deployments/{job}"))?;
        Ok(dto.status())
    }

    fn download(
        &self,
        env: &EnvironmentId,
        job: &DeploymentId,
    ) -> Result<Download, RemoteJobError> {
        let url = self.endpoint(&format!(
            "/cc-ui/v1/clusters/{env}/deployments/{job}/download-terraform-export"
        ))?;
        let response = self
            .get(&url)
            .set("Accept", "*/*")
            .call()
            .map_err(|e| map_error(url.as_str(), e))?;
        if response.status() != 200 {
            return Err(RemoteJobError::Http {
                status: response.status(),
                url: url.to_string(),
            });
        }
        let length = response
            .header("Content-Length")
            .and_then(|v| v.parse::<u64>().ok());
        Ok(Download {
            length,
            body: Box::new(response.into_reader()),
        })
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn map_error(url: &str, err: ureq::Error) -> RemoteJobError {
    match err {
        ureq::Error::Status(503, _) => RemoteJobError::ServiceUnavailable,
        ureq::Error::Status(status, _) => RemoteJobError::Http {
            status,
            url: url.to_string(),
        },
        ureq::Error::Transport(t) => RemoteJobError::Transport {
            url: url.to_string(),
            message: t.to_string(),
        },
    }
}

/// Turn a 400 body from the trigger endpoint into the message shown to the user.
fn classify_rejection(body: &str) -> RemoteJobError {
    if body.contains(NOT_RUNNING) {
        return RemoteJobError::NotRunnable(NOT_RUNNING.to_string());
    }
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| REJECTED_FALLBACK.to_string());
    RemoteJobError::Rejected(message)
}
