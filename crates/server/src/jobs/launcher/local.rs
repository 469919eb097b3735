// crates/server/src/jobs/launcher/local.rs
//! Local subprocess strategy: the wrapper script runs the deployment
//! command directly on this host.

use std::path::PathBuf;

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

use super::{spawn_wrapper, LaunchError, LaunchSpec, Launched, Launcher, ProcessHandle};

pub struct LocalLauncher {
    shell: PathBuf,
}

impl LocalLauncher {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

#[async_trait]
impl Launcher for LocalLauncher {
    async fn start(&self, spec: &LaunchSpec) -> Result<Launched, LaunchError> {
        spawn_wrapper(&self.shell, spec)
    }

    async fn terminate(&self, handle: &ProcessHandle) {
        terminate_process_group(handle.pid);
    }
}

/// Send SIGTERM to a job's whole process group. Best-effort: the group may
/// already be gone, or may never have started.
pub fn terminate_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    if pid == 0 {
        return;
    }
    // The child was spawned with process_group(0), so its pid is the pgid.
    if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        tracing::debug!(pid, error = %e, "killpg failed (process likely gone)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::script::write_runner_script;
    use std::time::Duration;

    #[test]
    fn terminate_tolerates_missing_pid() {
        terminate_process_group(None);
        terminate_process_group(Some(0));
        // A pid that is almost certainly unused; must not panic.
        terminate_process_group(Some(4_000_000));
    }

    #[tokio::test]
    async fn terminate_kills_the_whole_group() {
        let dir = tempfile::tempdir().unwrap();
        let script_path = dir.path().join("run.sh");
        write_runner_script(&script_path).unwrap();

        let spec = LaunchSpec {
            job_id: "kill-test".into(),
            job_dir: dir.path().to_path_buf(),
            script_path,
            // The wrapper spawns sleep as a child of bash; killing the group
            // must take down both.
            args: vec!["sleep".into(), "30".into()],
            env: Vec::new(),
        };

        let launcher = LocalLauncher::new("/bin/bash");
        let mut launched = launcher.start(&spec).await.unwrap();
        let pid = launched.pid;
        assert!(pid.is_some());

        launcher
            .terminate(&ProcessHandle {
                pid,
                container_id: None,
            })
            .await;

        let status = tokio::time::timeout(Duration::from_secs(5), launched.child.wait())
            .await
            .expect("process group did not die after SIGTERM")
            .unwrap();
        assert!(!status.success());
    }
}
