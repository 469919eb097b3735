// crates/core/src/paths.rs
//! Centralized path layout for job state on disk.
//!
//! Single source of truth — every file a job owns lives under
//! `<state_dir>/jobs/<job_id>/` with fixed names.

use std::path::{Path, PathBuf};

/// All filesystem locations owned by one job.
#[derive(Debug, Clone)]
pub struct JobPaths {
    pub job_dir: PathBuf,
    /// Persisted metadata record.
    pub meta_path: PathBuf,
    /// Masked copy of the request that created the job.
    pub request_path: PathBuf,
    pub inventory_path: PathBuf,
    pub vars_json_path: PathBuf,
    pub vars_yaml_path: PathBuf,
    /// Ephemeral private key, present only while the job runs with key auth.
    pub ssh_key_path: PathBuf,
    /// Append-only masked combined output.
    pub log_path: PathBuf,
    /// Generated wrapper script the process actually executes.
    pub script_path: PathBuf,
}

impl JobPaths {
    pub fn new(jobs_root: &Path, job_id: &str) -> Self {
        let job_dir = jobs_root.join(job_id);
        Self {
            meta_path: job_dir.join("job.json"),
            request_path: job_dir.join("request.json"),
            inventory_path: job_dir.join("inventory.yml"),
            vars_json_path: job_dir.join("vars.json"),
            vars_yaml_path: job_dir.join("vars.yml"),
            ssh_key_path: job_dir.join("id_rsa"),
            log_path: job_dir.join("job.log"),
            script_path: job_dir.join("run.sh"),
            job_dir,
        }
    }
}

/// Jobs root under a state directory.
pub fn jobs_root(state_dir: &Path) -> PathBuf {
    state_dir.join("jobs")
}

/// Default state directory when `RUNHUB_STATE_DIR` is not set:
/// `/var/lib/runhub`, falling back to a per-user data dir.
pub fn default_state_dir() -> PathBuf {
    let system = PathBuf::from("/var/lib/runhub");
    if system.is_dir() {
        return system;
    }
    dirs::data_local_dir()
        .map(|d| d.join("runhub"))
        .unwrap_or(system)
}
