// crates/core/src/types.rs
//! Domain types for deployment jobs: lifecycle status, persisted metadata,
//! API snapshots, and the incoming deployment request.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RequestError;

/// Lifecycle status of a deployment job.
///
/// Transitions are monotonic: `queued → running → {succeeded|failed}`,
/// `running → canceled`, and `queued → failed` when the launch itself
/// fails. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Persisted per-job record (`job.json`).
///
/// Written atomically; every timestamp is set exactly once. `pid` is set for
/// local jobs, `container_id` for container jobs, when the process actually
/// starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMeta {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_cleanup: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_build: bool,
}

impl JobMeta {
    pub fn new(job_id: impl Into<String>, created_at: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Queued,
            created_at: created_at.into(),
            started_at: None,
            finished_at: None,
            pid: None,
            exit_code: None,
            container_id: None,
            skip_cleanup: false,
            skip_build: false,
        }
    }
}

/// API-facing view of a job: the persisted record plus the filesystem
/// locations useful for debugging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: String,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub container_id: Option<String>,
    pub workspace_dir: String,
    pub log_path: String,
    pub inventory_path: String,
    pub request_path: String,
}

/// Where the deployment lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployTarget {
    Server,
    Workstation,
}

impl DeployTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Workstation => "workstation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Password,
    PrivateKey,
}

/// SSH credentials for the deployment. Exactly one method must be provided;
/// none of these fields are ever echoed back or written to disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployAuth {
    pub method: AuthMethod,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// Incoming deployment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Workspace id to pull the inventory from; `None` means the inventory
    /// is rendered inline from `host`/`user`/`selected_roles`.
    #[serde(default)]
    pub workspace_id: Option<String>,
    pub deploy_target: DeployTarget,
    pub host: String,
    pub user: String,
    pub auth: DeployAuth,
    /// Optional host-pattern limit passed through to the deployment tool.
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub selected_roles: Vec<String>,
}

impl DeployRequest {
    /// Schema validation, enforced by the HTTP layer before a job is created.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.host.trim().is_empty() {
            return Err(RequestError::Empty { field: "host" });
        }
        if self.user.trim().is_empty() {
            return Err(RequestError::Empty { field: "user" });
        }
        if let Some(ws) = &self.workspace_id {
            if ws.trim().is_empty() {
                return Err(RequestError::Empty {
                    field: "workspace_id",
                });
            }
        }
        match self.auth.method {
            AuthMethod::Password => {
                if self.auth.password.as_deref().unwrap_or("").is_empty() {
                    return Err(RequestError::MissingPassword);
                }
                if self.auth.private_key.is_some() {
                    return Err(RequestError::ConflictingAuth {
                        field: "private_key",
                        method: "password",
                    });
                }
            }
            AuthMethod::PrivateKey => {
                if self.auth.private_key.as_deref().unwrap_or("").is_empty() {
                    return Err(RequestError::MissingPrivateKey);
                }
                if self.auth.password.is_some() {
                    return Err(RequestError::ConflictingAuth {
                        field: "password",
                        method: "private_key",
                    });
                }
            }
        }
        if self.roles().is_empty() {
            return Err(RequestError::NoRoles);
        }
        Ok(())
    }

    /// Selected roles, trimmed and deduplicated in request order.
    pub fn roles(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.selected_roles
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .filter(|r| seen.insert(r.to_string()))
            .map(str::to_string)
            .collect()
    }

    /// Host-pattern limit, trimmed; empty becomes `None`.
    pub fn limit(&self) -> Option<&str> {
        self.limit
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
    }
}
