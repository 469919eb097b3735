// crates/server/src/jobs/launcher/mod.rs
//! Process-launch strategies.
//!
//! Both strategies execute the job's generated wrapper script in a fresh
//! process group and hand its combined output to exactly one reader task;
//! they differ in what the wrapper runs (the deployment command line vs. a
//! docker invocation) and in how termination works.

pub mod container;
pub mod local;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{Child, ChildStdout, Command};

pub use container::ContainerLauncher;
pub use local::{terminate_process_group, LocalLauncher};

/// Everything needed to start one job's process.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub job_id: String,
    pub job_dir: PathBuf,
    pub script_path: PathBuf,
    /// Arguments for the wrapper script: the deployment command line, or the
    /// docker invocation for container jobs. Empty when the wrapper command
    /// override (`RUNHUB_CMD`) drives the job.
    pub args: Vec<String>,
    /// Extra environment entries for the child.
    pub env: Vec<(String, String)>,
}

/// A successfully started job process.
pub struct Launched {
    pub child: Child,
    pub stdout: ChildStdout,
    pub pid: Option<u32>,
}

/// What `terminate` needs to find the job's process tree again, typically
/// reconstructed from persisted metadata.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: Option<u32>,
    pub container_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn runner process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("runner process has no stdout pipe")]
    NoStdout,
}

#[async_trait]
pub trait Launcher: Send + Sync {
    /// Spawn the job's wrapper script, returning the running child and its
    /// combined output stream.
    async fn start(&self, spec: &LaunchSpec) -> Result<Launched, LaunchError>;

    /// Best-effort termination of everything the job started. Failures are
    /// swallowed: the process may already be gone.
    async fn terminate(&self, handle: &ProcessHandle);
}

/// Spawn `shell script.sh [args…]` in the job directory, in its own process
/// group so termination can signal the whole subtree at once. The wrapper
/// folds stderr into stdout, so only stdout is piped.
pub(crate) fn spawn_wrapper(shell: &Path, spec: &LaunchSpec) -> Result<Launched, LaunchError> {
    let mut cmd = Command::new(shell);
    cmd.arg(&spec.script_path)
        .args(&spec.args)
        .current_dir(&spec.job_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(false)
        .process_group(0);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(LaunchError::Spawn)?;
    let stdout = child.stdout.take().ok_or(LaunchError::NoStdout)?;
    let pid = child.id();
    Ok(Launched { child, stdout, pid })
}
