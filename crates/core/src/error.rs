// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors reading or writing a job's persisted state on disk.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("job not found: {job_id}")]
    NotFound { job_id: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed metadata in {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

impl MetaError {
    pub fn io(path: impl Into<PathBuf>, job_id: &str, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound {
                job_id: job_id.to_string(),
            },
            _ => Self::Io { path, source },
        }
    }
}

/// Errors raised while validating an incoming deployment request.
///
/// Schema-level validation (required fields, exactly one auth method,
/// non-empty role selection) happens in the HTTP layer before a job id is
/// ever allocated.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("auth.password is required when auth.method=password")]
    MissingPassword,

    #[error("auth.private_key is required when auth.method=private_key")]
    MissingPrivateKey,

    #[error("auth.{field} must not be set for auth.method={method}")]
    ConflictingAuth { field: &'static str, method: &'static str },

    #[error("selected_roles must not be empty")]
    NoRoles,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_job_not_found() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = MetaError::io("/state/jobs/abc/job.json", "abc", source);
        assert!(matches!(err, MetaError::NotFound { ref job_id } if job_id == "abc"));
    }

    #[test]
    fn io_other_keeps_path() {
        let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = MetaError::io("/state/jobs/abc/job.json", "abc", source);
        assert!(err.to_string().contains("/state/jobs/abc/job.json"));
    }

    #[test]
    fn request_error_display() {
        let err = RequestError::Empty { field: "host" };
        assert_eq!(err.to_string(), "host must not be empty");
    }
}
