// crates/server/src/jobs/script.rs
//! Generation of the per-job wrapper script (`run.sh`).
//!
//! Every job process — local or containerized docker client — runs through
//! this script. It logs each command it executes, forces line buffering via
//! `stdbuf` when available, and folds stderr into stdout so the launcher
//! reads a single combined stream.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use runhub_core::fsutil::atomic_write_text;

const RUNNER_SCRIPT: &str = r#"#!/usr/bin/env bash
set -euo pipefail
exec 2>&1

log_cmd() {
  printf '+'
  for arg in "$@"; do
    printf ' %q' "$arg"
  done
  printf '\n'
}

run_cmd() {
  log_cmd "$@"
  if command -v stdbuf >/dev/null 2>&1; then
    stdbuf -oL -eL "$@"
  else
    "$@"
  fi
}

if [ "$#" -gt 0 ]; then
  run_cmd "$@"
  exit $?
fi

if [ -n "${RUNHUB_CMD:-}" ]; then
  run_cmd /bin/bash -lc "${RUNHUB_CMD}"
  exit $?
fi

echo "no command provided: set RUNHUB_CMD or pass a command"
exit 1
"#;

/// Write the wrapper script with owner-only execute permissions.
pub fn write_runner_script(path: &Path) -> io::Result<()> {
    atomic_write_text(path, RUNNER_SCRIPT)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_is_written_executable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.sh");
        write_runner_script(&path).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o700);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("#!/usr/bin/env bash"));
        assert!(text.contains("RUNHUB_CMD"));
    }

    #[test]
    fn command_override_runs_and_propagates_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.sh");
        write_runner_script(&path).unwrap();

        let out = std::process::Command::new("/bin/bash")
            .arg(&path)
            .current_dir(dir.path())
            .env("RUNHUB_CMD", "printf 'out1\\n'; printf 'err1\\n' 1>&2; exit 7")
            .output()
            .unwrap();

        assert_eq!(out.status.code(), Some(7));
        let stdout = String::from_utf8_lossy(&out.stdout);
        // Both streams land on stdout; the command itself is echoed first.
        assert!(stdout.contains("+ /bin/bash -lc"));
        assert!(stdout.contains("out1"));
        assert!(stdout.contains("err1"));
    }

    #[test]
    fn cli_arguments_take_precedence_over_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.sh");
        write_runner_script(&path).unwrap();

        let out = std::process::Command::new("/bin/bash")
            .arg(&path)
            .arg("echo")
            .arg("cli-command")
            .current_dir(dir.path())
            .env("RUNHUB_CMD", "echo should-not-run")
            .output()
            .unwrap();

        assert_eq!(out.status.code(), Some(0));
        let stdout = String::from_utf8_lossy(&out.stdout);
        assert!(stdout.contains("cli-command"));
        assert!(!stdout.contains("should-not-run"));
    }

    #[test]
    fn no_command_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.sh");
        write_runner_script(&path).unwrap();

        let out = std::process::Command::new("/bin/bash")
            .arg(&path)
            .current_dir(dir.path())
            .env_remove("RUNHUB_CMD")
            .output()
            .unwrap();

        assert_eq!(out.status.code(), Some(1));
    }
}
