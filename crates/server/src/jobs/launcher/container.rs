// crates/server/src/jobs/launcher/container.rs
//! Containerized strategy: the wrapper script runs a `docker run` invocation
//! against the host docker daemon.
//!
//! The orchestrator itself may live inside a container, so the job
//! directory's path must be translated to the *host* path before it can be
//! bind-mounted; getting that mapping wrong is a configuration error, never
//! a silent bad mount.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use crate::config::{ConfigError, ContainerRuntime};

use super::{spawn_wrapper, LaunchError, LaunchSpec, Launched, Launcher, ProcessHandle};

pub struct ContainerLauncher {
    shell: PathBuf,
    docker_bin: String,
}

impl ContainerLauncher {
    pub fn new(shell: impl Into<PathBuf>, docker_bin: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            docker_bin: docker_bin.into(),
        }
    }
}

#[async_trait]
impl Launcher for ContainerLauncher {
    async fn start(&self, spec: &LaunchSpec) -> Result<Launched, LaunchError> {
        spawn_wrapper(&self.shell, spec)
    }

    async fn terminate(&self, handle: &ProcessHandle) {
        // The docker client runs locally in its own group; the container is
        // stopped by name. Both are best-effort.
        super::terminate_process_group(handle.pid);
        if let Some(name) = handle.container_id.as_deref() {
            stop_container(&self.docker_bin, name).await;
        }
    }
}

/// Deterministic container name for a job.
pub fn container_name(job_id: &str) -> String {
    format!("runhub-job-{job_id}")
}

/// Translate the orchestrator-visible job directory into the path the host
/// docker daemon can bind-mount.
pub fn resolve_host_job_dir(
    state_dir: &Path,
    state_host_path: &Path,
    job_dir: &Path,
) -> Result<PathBuf, ConfigError> {
    let rel = job_dir
        .strip_prefix(state_dir)
        .map_err(|_| ConfigError::JobDirOutsideState {
            job_dir: job_dir.display().to_string(),
            state_dir: state_dir.display().to_string(),
        })?;
    Ok(state_host_path.join(rel))
}

/// Build the docker invocation the wrapper script will run, plus the
/// container name recorded in job metadata.
pub fn build_container_args(
    runtime: &ContainerRuntime,
    job_id: &str,
    state_dir: &Path,
    job_dir: &Path,
    tool_cmd: &[String],
) -> Result<(Vec<String>, String), ConfigError> {
    let name = container_name(job_id);
    let host_job_dir = resolve_host_job_dir(state_dir, &runtime.state_host_path, job_dir)?;

    let inner_cmd = format!(
        "export PATH={}:$PATH; {}",
        shell_quote(&runtime.repo_dir),
        shell_join(tool_cmd)
    );

    let mut args: Vec<String> = vec![
        runtime.docker_bin.clone(),
        "run".into(),
        "--rm".into(),
        "--name".into(),
        name.clone(),
    ];

    if let Some(network) = &runtime.network {
        args.push("--network".into());
        args.push(network.clone());
    }

    args.extend(runtime.extra_args.iter().cloned());

    args.push("-v".into());
    args.push(format!("{}:{}", host_job_dir.display(), runtime.workdir));

    if let Some(repo_host) = &runtime.repo_host_path {
        args.push("-v".into());
        args.push(format!("{}:{}:ro", repo_host.display(), runtime.repo_dir));
    }

    // Keep the inner process line-buffered so observers see output promptly.
    args.push("-e".into());
    args.push("PYTHONUNBUFFERED=1".into());
    args.push("-w".into());
    args.push(runtime.workdir.clone());
    args.push(runtime.image.clone());
    args.push("/bin/bash".into());
    args.push("-lc".into());
    args.push(inner_cmd);

    Ok((args, name))
}

/// Stop a job container by name. Failures are ignored: the container may
/// have exited on its own.
pub async fn stop_container(docker_bin: &str, name: &str) {
    let name = name.trim();
    if name.is_empty() {
        return;
    }
    let result = tokio::process::Command::new(docker_bin)
        .args(["stop", name])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match result {
        Ok(status) if !status.success() => {
            tracing::debug!(container = name, code = ?status.code(), "docker stop non-zero (ignored)");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::debug!(container = name, error = %e, "docker stop failed (ignored)");
        }
    }
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(b, b'-' | b'_' | b'.' | b'/' | b':' | b'=' | b'@' | b'%' | b'+' | b',')
        });
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn runtime() -> ContainerRuntime {
        ContainerRuntime {
            image: "deploy:latest".into(),
            workdir: "/workspace".into(),
            network: None,
            extra_args: Vec::new(),
            docker_bin: "docker".into(),
            repo_dir: "/opt/src/deploy".into(),
            repo_host_path: None,
            state_host_path: PathBuf::from("/srv/runhub-state"),
        }
    }

    #[test]
    fn container_name_is_deterministic() {
        assert_eq!(container_name("abc123"), "runhub-job-abc123");
    }

    #[test]
    fn host_job_dir_is_remapped() {
        let host = resolve_host_job_dir(
            Path::new("/state"),
            Path::new("/srv/runhub-state"),
            Path::new("/state/jobs/abc123"),
        )
        .unwrap();
        assert_eq!(host, PathBuf::from("/srv/runhub-state/jobs/abc123"));
    }

    #[test]
    fn job_dir_outside_state_dir_is_an_error() {
        let err = resolve_host_job_dir(
            Path::new("/state"),
            Path::new("/srv/runhub-state"),
            Path::new("/elsewhere/jobs/abc123"),
        );
        assert!(matches!(err, Err(ConfigError::JobDirOutsideState { .. })));
    }

    #[test]
    fn build_args_shape() {
        let (args, name) = build_container_args(
            &runtime(),
            "abc123",
            Path::new("/state"),
            Path::new("/state/jobs/abc123"),
            &["deployctl".to_string(), "deploy".to_string()],
        )
        .unwrap();

        assert_eq!(name, "runhub-job-abc123");
        assert_eq!(args[0], "docker");
        assert!(args.contains(&"--rm".to_string()));
        assert!(args.contains(&"runhub-job-abc123".to_string()));
        assert!(args.contains(&"PYTHONUNBUFFERED=1".to_string()));
        assert!(args.contains(&"/srv/runhub-state/jobs/abc123:/workspace".to_string()));
        assert!(args.contains(&"deploy:latest".to_string()));
        // The inner command runs the tool with the repo dir on PATH.
        let inner = args.last().unwrap();
        assert!(inner.contains("export PATH=/opt/src/deploy:$PATH"));
        assert!(inner.contains("deployctl deploy"));
    }

    #[test]
    fn build_args_with_network_and_ro_repo_mount() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = runtime();
        rt.network = Some("deploy-net".into());
        rt.repo_host_path = Some(dir.path().to_path_buf());
        rt.extra_args = vec!["--memory".into(), "2g".into()];

        let (args, _) = build_container_args(
            &rt,
            "abc123",
            Path::new("/state"),
            Path::new("/state/jobs/abc123"),
            &["deployctl".to_string()],
        )
        .unwrap();

        let joined = args.join(" ");
        assert!(joined.contains("--network deploy-net"));
        assert!(joined.contains("--memory 2g"));
        assert!(joined.contains(&format!("{}:/opt/src/deploy:ro", dir.path().display())));
    }

    #[test]
    fn shell_quote_protects_specials() {
        assert_eq!(shell_quote("plain-arg"), "plain-arg");
        assert_eq!(shell_quote("has space"), "'has space'");
        assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
        assert_eq!(shell_quote(""), "''");
    }
}
