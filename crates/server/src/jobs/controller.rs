// crates/server/src/jobs/controller.rs
//! Job lifecycle orchestration: create, inspect, cancel, finalize.
//!
//! One controller instance serves the whole process; it is cheap to clone
//! (all fields are shared handles) and owns no per-job state in memory —
//! everything observable survives in the job directory, which is what makes
//! `get` work across restarts.

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::timeout;
use uuid::Uuid;

use runhub_core::error::MetaError;
use runhub_core::fsutil::{atomic_write_json, atomic_write_text, ensure_dir, utc_now};
use runhub_core::paths::JobPaths;
use runhub_core::secrets::{collect_secrets, mask_json_value, masked_request};
use runhub_core::types::{AuthMethod, DeployRequest, JobMeta, JobSnapshot, JobStatus};

use crate::config::{Backend, Config, ConfigError};
use crate::error::ApiError;

use super::hub::LogHub;
use super::inventory::InventorySource;
use super::launcher::{
    container, ContainerLauncher, LaunchSpec, Launcher, LocalLauncher, ProcessHandle,
};
use super::reader::{spawn_output_tasks, OutputTasks};
use super::script::write_runner_script;
use super::secret_store::SecretStore;

/// Bounded wait for the reader/writer tasks after the process exits.
const TASK_JOIN_WAIT: Duration = Duration::from_secs(2);

/// Exit code recorded when the runner could not be started at all.
const LAUNCH_FAILURE_EXIT_CODE: i32 = 127;

#[derive(Clone)]
pub struct JobController {
    config: Arc<Config>,
    hub: Arc<LogHub>,
    secrets: Arc<SecretStore>,
    inventory: Arc<dyn InventorySource>,
}

impl JobController {
    pub fn new(
        config: Arc<Config>,
        hub: Arc<LogHub>,
        secrets: Arc<SecretStore>,
        inventory: Arc<dyn InventorySource>,
    ) -> Result<Self, ConfigError> {
        let jobs_root = config.jobs_root();
        ensure_dir(&jobs_root).map_err(|source| ConfigError::Io {
            path: jobs_root.display().to_string(),
            source,
        })?;
        Ok(Self {
            config,
            hub,
            secrets,
            inventory,
        })
    }

    pub fn hub(&self) -> &Arc<LogHub> {
        &self.hub
    }

    pub fn secret_store(&self) -> &Arc<SecretStore> {
        &self.secrets
    }

    pub fn paths(&self, job_id: &str) -> JobPaths {
        JobPaths::new(&self.config.jobs_root(), job_id)
    }

    /// Create a job: persist its masked request, inventory and variables,
    /// then launch the runner process and start the background finalizer.
    pub async fn create(&self, req: &DeployRequest) -> Result<JobSnapshot, ApiError> {
        let mut job_id = Uuid::new_v4().simple().to_string();
        job_id.truncate(12);
        let p = self.paths(&job_id);
        ensure_dir(&p.job_dir)
            .map_err(|e| ApiError::Internal(format!("cannot create job dir: {e}")))?;

        let resolved = self
            .inventory
            .resolve(req)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        atomic_write_text(&p.inventory_path, &resolved.yaml)
            .map_err(|e| ApiError::Internal(format!("cannot write inventory: {e}")))?;
        let roles = if resolved.roles.is_empty() {
            req.roles()
        } else {
            resolved.roles
        };

        let secrets = collect_secrets(req);
        self.persist_masked_documents(req, &p, &roles, &secrets)?;
        write_runner_script(&p.script_path)
            .map_err(|e| ApiError::Internal(format!("cannot write runner script: {e}")))?;
        self.secrets.insert(&job_id, secrets.clone());

        let mut meta = JobMeta::new(&job_id, utc_now());
        meta.skip_cleanup = self.config.skip_cleanup;
        meta.skip_build = self.config.skip_build;
        self.write_meta(&p, &meta)?;

        // Build what the wrapper script runs: nothing when the command
        // override drives the job, the deployment command line for local
        // jobs, a docker invocation for container jobs.
        let mut docker_bin: Option<String> = None;
        let args: Vec<String> = if self.config.command_override.is_some() {
            Vec::new()
        } else {
            match self.config.backend {
                Backend::Local => {
                    let inventory_arg = p.inventory_path.display().to_string();
                    self.build_tool_command(req, &inventory_arg, &roles)?
                }
                Backend::Container => {
                    let runtime = self.config.container.runtime()?;
                    let inventory_arg = format!("{}/inventory.yml", runtime.workdir);
                    let tool_cmd = self.build_tool_command(req, &inventory_arg, &roles)?;
                    let (docker_args, name) = container::build_container_args(
                        &runtime,
                        &job_id,
                        &self.config.state_dir,
                        &p.job_dir,
                        &tool_cmd,
                    )?;
                    meta.container_id = Some(name);
                    docker_bin = Some(runtime.docker_bin);
                    self.write_meta(&p, &meta)?;
                    docker_args
                }
            }
        };

        let launcher: Box<dyn Launcher> = match self.config.backend {
            Backend::Local => Box::new(LocalLauncher::new(&self.config.shell)),
            Backend::Container => Box::new(ContainerLauncher::new(
                &self.config.shell,
                docker_bin.unwrap_or_else(|| "docker".to_string()),
            )),
        };

        let spec = LaunchSpec {
            job_id: job_id.clone(),
            job_dir: p.job_dir.clone(),
            script_path: p.script_path.clone(),
            args,
            env: self.runner_env(),
        };

        let launched = match launcher.start(&spec).await {
            Ok(launched) => launched,
            Err(e) => {
                meta.status = JobStatus::Failed;
                meta.exit_code = Some(LAUNCH_FAILURE_EXIT_CODE);
                meta.finished_at = Some(utc_now());
                if let Err(write_err) = self.write_meta(&p, &meta) {
                    tracing::error!(job_id = %job_id, error = %write_err, "cannot persist launch failure");
                }
                remove_file_if_present(&p.ssh_key_path);
                self.secrets.remove(&job_id);
                return Err(ApiError::Launch(e.to_string()));
            }
        };

        meta.status = JobStatus::Running;
        meta.started_at = Some(utc_now());
        meta.pid = launched.pid;
        self.write_meta(&p, &meta)?;
        tracing::info!(job_id = %job_id, pid = ?launched.pid, backend = ?self.config.backend, "job started");

        let tasks = spawn_output_tasks(
            launched.stdout,
            job_id.clone(),
            p.log_path.clone(),
            secrets,
            self.hub.clone(),
        );
        let controller = self.clone();
        let finalize_id = job_id.clone();
        tokio::spawn(async move {
            controller.finalize(finalize_id, launched.child, tasks).await;
        });

        self.get(&job_id)
    }

    /// Read-only snapshot of a job from its persisted metadata. Never
    /// touches the live process.
    pub fn get(&self, job_id: &str) -> Result<JobSnapshot, ApiError> {
        let meta = self.load_meta(job_id)?;
        let p = self.paths(&meta.job_id);
        Ok(JobSnapshot {
            job_id: meta.job_id.clone(),
            status: meta.status,
            created_at: meta.created_at,
            started_at: meta.started_at,
            finished_at: meta.finished_at,
            pid: meta.pid,
            exit_code: meta.exit_code,
            container_id: meta.container_id,
            workspace_dir: p.job_dir.display().to_string(),
            log_path: p.log_path.display().to_string(),
            inventory_path: p.inventory_path.display().to_string(),
            request_path: p.request_path.display().to_string(),
        })
    }

    /// Cancel a job. Idempotent: canceling a terminal job succeeds without
    /// doing anything. Returns `Ok(false)` only when the id resolves to no
    /// metadata at all.
    pub async fn cancel(&self, job_id: &str) -> Result<bool, ApiError> {
        let mut meta = match self.load_meta(job_id) {
            Ok(meta) => meta,
            Err(MetaError::NotFound { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if meta.status.is_terminal() {
            return Ok(true);
        }

        // Mark canceled before signaling: the finalizer re-reads metadata
        // after the process dies and must always observe the cancel.
        meta.status = JobStatus::Canceled;
        meta.finished_at = Some(utc_now());
        let p = self.paths(&meta.job_id);
        self.write_meta(&p, &meta)?;

        let handle = ProcessHandle {
            pid: meta.pid,
            container_id: meta.container_id.clone(),
        };
        let launcher: Box<dyn Launcher> = if handle.container_id.is_some() {
            let docker_bin = self
                .config
                .container
                .docker_bin
                .clone()
                .unwrap_or_else(|| "docker".to_string());
            Box::new(ContainerLauncher::new(&self.config.shell, docker_bin))
        } else {
            Box::new(LocalLauncher::new(&self.config.shell))
        };
        launcher.terminate(&handle).await;
        remove_file_if_present(&p.ssh_key_path);
        self.secrets.remove(&meta.job_id);
        tracing::info!(job_id = %meta.job_id, "job canceled");
        Ok(true)
    }

    /// Background task, one per launched job: waits for the process, joins
    /// the output pipeline, cleans up the ephemeral key and secret set, and
    /// writes the terminal metadata. Must never leave a job `running`.
    async fn finalize(self, job_id: String, mut child: Child, tasks: OutputTasks) {
        let exit = child.wait().await;

        if timeout(TASK_JOIN_WAIT, tasks.reader).await.is_err() {
            tracing::warn!(job_id = %job_id, "output reader did not finish within join window");
        }
        if timeout(TASK_JOIN_WAIT, tasks.writer).await.is_err() {
            tracing::warn!(job_id = %job_id, "log writer did not finish within join window");
        }

        let p = self.paths(&job_id);
        remove_file_if_present(&p.ssh_key_path);
        self.secrets.remove(&job_id);

        let code = match exit {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "waiting on runner process failed");
                -1
            }
        };

        match self.load_meta(&job_id) {
            Ok(mut meta) => {
                // Cancel wins: only back-fill the finish time.
                if meta.status == JobStatus::Canceled {
                    if meta.finished_at.is_none() {
                        meta.finished_at = Some(utc_now());
                        if let Err(e) = self.write_meta(&p, &meta) {
                            tracing::error!(job_id = %job_id, error = %e, "cannot back-fill finished_at");
                        }
                    }
                    return;
                }
                meta.finished_at = Some(utc_now());
                meta.exit_code = Some(code);
                meta.status = if code == 0 {
                    JobStatus::Succeeded
                } else {
                    JobStatus::Failed
                };
                if let Err(e) = self.write_meta(&p, &meta) {
                    tracing::error!(job_id = %job_id, error = %e, "cannot persist terminal status");
                } else {
                    tracing::info!(job_id = %job_id, exit_code = code, status = %meta.status, "job finished");
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "finalize could not load job metadata");
            }
        }
    }

    pub fn load_meta(&self, job_id: &str) -> Result<JobMeta, MetaError> {
        let rid = job_id.trim();
        if rid.is_empty() {
            return Err(MetaError::NotFound {
                job_id: String::new(),
            });
        }
        let p = self.paths(rid);
        if !p.job_dir.is_dir() {
            return Err(MetaError::NotFound {
                job_id: rid.to_string(),
            });
        }
        let text = std::fs::read_to_string(&p.meta_path)
            .map_err(|e| MetaError::io(&p.meta_path, rid, e))?;
        serde_json::from_str(&text).map_err(|e| MetaError::Malformed {
            path: p.meta_path.clone(),
            message: e.to_string(),
        })
    }

    fn write_meta(&self, p: &JobPaths, meta: &JobMeta) -> Result<(), ApiError> {
        atomic_write_json(&p.meta_path, meta)
            .map_err(|e| ApiError::Internal(format!("cannot write job metadata: {e}")))
    }

    /// Persist the masked request and the masked resolved variables (JSON
    /// and YAML forms). Writes the ephemeral private key with owner-only
    /// permissions when key auth is requested.
    fn persist_masked_documents(
        &self,
        req: &DeployRequest,
        p: &JobPaths,
        roles: &[String],
        secrets: &[String],
    ) -> Result<(), ApiError> {
        let internal = |e: std::io::Error| ApiError::Internal(e.to_string());

        let mut vars = serde_json::Map::new();
        vars.insert("selected_roles".to_string(), serde_json::json!(roles));
        vars.insert(
            "deploy_target".to_string(),
            serde_json::json!(req.deploy_target.as_str()),
        );
        match req.auth.method {
            AuthMethod::PrivateKey => {
                let key = req.auth.private_key.as_deref().unwrap_or_default();
                atomic_write_text(&p.ssh_key_path, key).map_err(internal)?;
                set_owner_only(&p.ssh_key_path).map_err(internal)?;
                vars.insert(
                    "ansible_ssh_private_key_file".to_string(),
                    serde_json::json!(p.ssh_key_path.display().to_string()),
                );
            }
            AuthMethod::Password => {
                vars.insert(
                    "ansible_password".to_string(),
                    serde_json::json!("<provided_at_runtime>"),
                );
            }
        }

        let masked_vars = mask_json_value(&serde_json::Value::Object(vars), secrets);
        atomic_write_json(&p.vars_json_path, &masked_vars).map_err(internal)?;
        let yaml = serde_yaml::to_string(&masked_vars)
            .map_err(|e| ApiError::Internal(format!("cannot render vars.yml: {e}")))?;
        atomic_write_text(&p.vars_yaml_path, &yaml).map_err(internal)?;
        atomic_write_json(&p.request_path, &masked_request(req)).map_err(internal)?;
        Ok(())
    }

    /// Deployment tool command line run inside the wrapper script.
    fn build_tool_command(
        &self,
        req: &DeployRequest,
        inventory_arg: &str,
        roles: &[String],
    ) -> Result<Vec<String>, ApiError> {
        if self.config.backend == Backend::Local {
            let repo = self
                .config
                .repo_dir
                .as_ref()
                .ok_or(ApiError::Config(ConfigError::MissingRepoDir))?;
            if !repo.is_dir() {
                return Err(ApiError::Config(ConfigError::NotADirectory {
                    var: "RUNHUB_REPO_DIR",
                    value: repo.display().to_string(),
                }));
            }
        }

        let mut cmd = vec![
            self.config.deploy_bin.clone(),
            "deploy".to_string(),
            inventory_arg.to_string(),
            "-T".to_string(),
            req.deploy_target.as_str().to_string(),
        ];
        if let Some(limit) = req.limit() {
            cmd.push("-l".to_string());
            cmd.push(limit.to_string());
        }
        if self.config.skip_cleanup {
            cmd.push("--skip-cleanup".to_string());
        }
        if self.config.skip_build {
            cmd.push("--skip-build".to_string());
        }
        if !roles.is_empty() {
            cmd.push("--roles".to_string());
            cmd.extend(roles.iter().cloned());
        }
        Ok(cmd)
    }

    /// Environment for the job process: state dir, command override, and the
    /// deployment tool checkout prepended to PATH for local jobs.
    fn runner_env(&self) -> Vec<(String, String)> {
        let mut env = vec![(
            "RUNHUB_STATE_DIR".to_string(),
            self.config.state_dir.display().to_string(),
        )];
        if let Some(cmd) = &self.config.command_override {
            env.push(("RUNHUB_CMD".to_string(), cmd.clone()));
        }
        if let Some(repo) = &self.config.repo_dir {
            let path = std::env::var("PATH").unwrap_or_default();
            env.push((
                "PATH".to_string(),
                format!("{}:{}", repo.display(), path),
            ));
        }
        env
    }
}

fn remove_file_if_present(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "cannot remove file");
        }
    }
}

fn set_owner_only(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}
