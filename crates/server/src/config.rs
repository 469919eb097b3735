// crates/server/src/config.rs
//! Runtime configuration, read once from the environment at startup.

use std::path::PathBuf;

use thiserror::Error;

use runhub_core::paths::{default_state_dir, jobs_root};

/// Process-launch strategy for jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Local,
    Container,
}

impl Backend {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "local" => Ok(Self::Local),
            "container" => Ok(Self::Container),
            other => Err(ConfigError::InvalidBackend {
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("RUNHUB_BACKEND must be 'local' or 'container', got '{value}'")]
    InvalidBackend { value: String },

    #[error("RUNHUB_IMAGE must be set for the container backend")]
    MissingImage,

    #[error("RUNHUB_STATE_HOST_PATH must be set for container volume mounts")]
    MissingStateHostPath,

    #[error("{var} must be an absolute path, got '{value}'")]
    NotAbsolute { var: &'static str, value: String },

    #[error("{var} is not a directory: '{value}'")]
    NotADirectory { var: &'static str, value: String },

    #[error("job directory {job_dir} is not inside the state directory {state_dir}")]
    JobDirOutsideState { job_dir: String, state_dir: String },

    #[error("docker CLI '{tried}' not found in PATH; set RUNHUB_DOCKER_BIN")]
    DockerNotFound { tried: String },

    #[error("RUNHUB_REPO_DIR must point at the deployment tool checkout for the local backend")]
    MissingRepoDir,

    #[error("IO error preparing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Container-backend settings. Loaded eagerly from the environment but only
/// validated (via [`ContainerSettings::runtime`]) when a container job is
/// actually created, so a local-only deployment never needs them.
#[derive(Debug, Clone, Default)]
pub struct ContainerSettings {
    /// Image the job runs in (`RUNHUB_IMAGE`). Required.
    pub image: Option<String>,
    /// In-container execution workdir where the job dir is mounted
    /// (`RUNHUB_CONTAINER_WORKDIR`, default `/workspace`).
    pub workdir: String,
    /// Optional docker network name (`RUNHUB_DOCKER_NETWORK`).
    pub network: Option<String>,
    /// Extra `docker run` arguments (`RUNHUB_DOCKER_ARGS`, whitespace
    /// separated — values with embedded spaces are not supported).
    pub extra_args: Vec<String>,
    /// Docker binary override (`RUNHUB_DOCKER_BIN`).
    pub docker_bin: Option<String>,
    /// In-container path of the deployment tool source (`RUNHUB_REPO_DIR`
    /// when the backend is `container`, default `/opt/src/deploy`).
    pub repo_dir: String,
    /// Host path of the deployment tool source, mounted read-only
    /// (`RUNHUB_REPO_HOST_PATH`).
    pub repo_host_path: Option<PathBuf>,
    /// Host path that `state_dir` is bind-mounted from
    /// (`RUNHUB_STATE_HOST_PATH`). Required: the orchestrator may itself
    /// run in a container, and the host docker daemon needs host paths.
    pub state_host_path: Option<PathBuf>,
}

/// Fully validated container settings, produced per job creation.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    pub image: String,
    pub workdir: String,
    pub network: Option<String>,
    pub extra_args: Vec<String>,
    pub docker_bin: String,
    pub repo_dir: String,
    pub repo_host_path: Option<PathBuf>,
    pub state_host_path: PathBuf,
}

impl ContainerSettings {
    /// Validate into a [`ContainerRuntime`], failing fast on anything that
    /// would otherwise turn into a wrong bind mount.
    pub fn runtime(&self) -> Result<ContainerRuntime, ConfigError> {
        let image = self
            .image
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingImage)?
            .to_string();

        let state_host_path = self
            .state_host_path
            .clone()
            .ok_or(ConfigError::MissingStateHostPath)?;
        if !state_host_path.is_absolute() {
            return Err(ConfigError::NotAbsolute {
                var: "RUNHUB_STATE_HOST_PATH",
                value: state_host_path.display().to_string(),
            });
        }

        let repo_host_path = match &self.repo_host_path {
            Some(path) => {
                if !path.is_absolute() {
                    return Err(ConfigError::NotAbsolute {
                        var: "RUNHUB_REPO_HOST_PATH",
                        value: path.display().to_string(),
                    });
                }
                if !path.is_dir() {
                    return Err(ConfigError::NotADirectory {
                        var: "RUNHUB_REPO_HOST_PATH",
                        value: path.display().to_string(),
                    });
                }
                Some(path.clone())
            }
            None => None,
        };

        Ok(ContainerRuntime {
            image,
            workdir: self.workdir.clone(),
            network: self.network.clone(),
            extra_args: self.extra_args.clone(),
            docker_bin: resolve_docker_bin(self.docker_bin.as_deref())?,
            repo_dir: self.repo_dir.clone(),
            repo_host_path,
            state_host_path,
        })
    }
}

/// Search PATH for the docker CLI. An explicit override is tried first.
pub fn resolve_docker_bin(preferred: Option<&str>) -> Result<String, ConfigError> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(bin) = preferred {
        let bin = bin.trim();
        if !bin.is_empty() {
            candidates.push(bin);
        }
    }
    candidates.push("docker");

    for cand in &candidates {
        // Absolute or relative paths are checked directly.
        if cand.contains('/') {
            if PathBuf::from(cand).is_file() {
                return Ok(cand.to_string());
            }
            continue;
        }
        if let Some(paths) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&paths) {
                if dir.join(cand).is_file() {
                    return Ok(cand.to_string());
                }
            }
        }
    }

    Err(ConfigError::DockerNotFound {
        tried: candidates.join(", "),
    })
}

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of all persisted job state (`RUNHUB_STATE_DIR`).
    pub state_dir: PathBuf,
    pub backend: Backend,
    /// Deployment tool binary invoked by generated commands
    /// (`RUNHUB_DEPLOY_BIN`, default `deployctl`).
    pub deploy_bin: String,
    /// Local-backend checkout of the deployment tool (`RUNHUB_REPO_DIR`).
    /// Prepended to PATH for the job process.
    pub repo_dir: Option<PathBuf>,
    /// Wrapper command override (`RUNHUB_CMD`): when set, the generated
    /// `run.sh` runs this instead of a built deployment command line.
    pub command_override: Option<String>,
    pub skip_cleanup: bool,
    pub skip_build: bool,
    /// Shell used to execute `run.sh` (tests point this at a missing path
    /// to exercise launch failures).
    pub shell: PathBuf,
    pub container: ContainerSettings,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let state_dir = env_path("RUNHUB_STATE_DIR").unwrap_or_else(default_state_dir);
        let backend = Backend::parse(&env_str("RUNHUB_BACKEND").unwrap_or_default())?;

        let container = ContainerSettings {
            image: env_str("RUNHUB_IMAGE"),
            workdir: env_str("RUNHUB_CONTAINER_WORKDIR")
                .unwrap_or_else(|| "/workspace".to_string()),
            network: env_str("RUNHUB_DOCKER_NETWORK"),
            extra_args: env_str("RUNHUB_DOCKER_ARGS")
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            docker_bin: env_str("RUNHUB_DOCKER_BIN"),
            repo_dir: if backend == Backend::Container {
                env_str("RUNHUB_REPO_DIR").unwrap_or_else(|| "/opt/src/deploy".to_string())
            } else {
                "/opt/src/deploy".to_string()
            },
            repo_host_path: env_path("RUNHUB_REPO_HOST_PATH"),
            state_host_path: env_path("RUNHUB_STATE_HOST_PATH"),
        };

        Ok(Self {
            state_dir,
            backend,
            deploy_bin: env_str("RUNHUB_DEPLOY_BIN").unwrap_or_else(|| "deployctl".to_string()),
            repo_dir: if backend == Backend::Local {
                env_path("RUNHUB_REPO_DIR")
            } else {
                None
            },
            command_override: env_str("RUNHUB_CMD"),
            skip_cleanup: env_bool("RUNHUB_SKIP_CLEANUP"),
            skip_build: env_bool("RUNHUB_SKIP_BUILD"),
            shell: PathBuf::from("/bin/bash"),
            container,
        })
    }

    /// A minimal local-backend configuration rooted at `state_dir`.
    pub fn local(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            backend: Backend::Local,
            deploy_bin: "deployctl".to_string(),
            repo_dir: None,
            command_override: None,
            skip_cleanup: false,
            skip_build: false,
            shell: PathBuf::from("/bin/bash"),
            container: ContainerSettings {
                workdir: "/workspace".to_string(),
                repo_dir: "/opt/src/deploy".to_string(),
                ..ContainerSettings::default()
            },
        }
    }

    pub fn jobs_root(&self) -> PathBuf {
        jobs_root(&self.state_dir)
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env_str(name).map(PathBuf::from)
}

fn env_bool(name: &str) -> bool {
    env_str(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;

    #[test]
    fn backend_parses_known_values() {
        assert_eq!(Backend::parse("local").unwrap(), Backend::Local);
        assert_eq!(Backend::parse(" Container ").unwrap(), Backend::Container);
        assert_eq!(Backend::parse("").unwrap(), Backend::Local);
        assert!(Backend::parse("k8s").is_err());
    }

    #[test]
    fn container_runtime_requires_image() {
        let settings = ContainerSettings {
            workdir: "/workspace".into(),
            repo_dir: "/opt/src/deploy".into(),
            state_host_path: Some("/srv/runhub".into()),
            ..ContainerSettings::default()
        };
        assert!(matches!(
            settings.runtime(),
            Err(ConfigError::MissingImage)
        ));
    }

    #[test]
    fn container_runtime_requires_host_path() {
        let settings = ContainerSettings {
            image: Some("deploy:latest".into()),
            workdir: "/workspace".into(),
            repo_dir: "/opt/src/deploy".into(),
            ..ContainerSettings::default()
        };
        assert!(matches!(
            settings.runtime(),
            Err(ConfigError::MissingStateHostPath)
        ));
    }

    #[test]
    fn container_runtime_rejects_relative_host_path() {
        let settings = ContainerSettings {
            image: Some("deploy:latest".into()),
            workdir: "/workspace".into(),
            repo_dir: "/opt/src/deploy".into(),
            state_host_path: Some("relative/state".into()),
            ..ContainerSettings::default()
        };
        assert!(matches!(
            settings.runtime(),
            Err(ConfigError::NotAbsolute { .. })
        ));
    }

    #[test]
    fn docker_bin_absolute_path_missing_fails() {
        let err = resolve_docker_bin(Some("/nonexistent/docker-bin"));
        assert!(matches!(err, Err(ConfigError::DockerNotFound { .. })));
    }

    #[test]
    #[serial]
    fn from_env_reads_overrides() {
        std::env::set_var("RUNHUB_STATE_DIR", "/tmp/runhub-test-state");
        std::env::set_var("RUNHUB_BACKEND", "local");
        std::env::set_var("RUNHUB_DEPLOY_BIN", "mydeploy");
        std::env::set_var("RUNHUB_SKIP_BUILD", "true");
        let config = Config::from_env().unwrap();
        std::env::remove_var("RUNHUB_STATE_DIR");
        std::env::remove_var("RUNHUB_BACKEND");
        std::env::remove_var("RUNHUB_DEPLOY_BIN");
        std::env::remove_var("RUNHUB_SKIP_BUILD");

        assert_eq!(config.state_dir, PathBuf::from("/tmp/runhub-test-state"));
        assert_eq!(config.backend, Backend::Local);
        assert_eq!(config.deploy_bin, "mydeploy");
        assert!(config.skip_build);
        assert!(!config.skip_cleanup);
    }

    #[test]
    #[serial]
    fn from_env_splits_docker_args() {
        std::env::set_var("RUNHUB_DOCKER_ARGS", "--cap-add NET_ADMIN --memory 2g");
        let config = Config::from_env().unwrap();
        std::env::remove_var("RUNHUB_DOCKER_ARGS");
        assert_eq!(
            config.container.extra_args,
            vec!["--cap-add", "NET_ADMIN", "--memory", "2g"]
        );
    }

    #[test]
    fn jobs_root_under_state_dir() {
        let config = Config::local("/srv/state");
        assert_eq!(config.jobs_root(), PathBuf::from("/srv/state/jobs"));
    }
}
