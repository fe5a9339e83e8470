//! Error types for the runner module.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors that can occur during pipeline runs.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Engine connection failed ({engine}): {reason}")]
    EngineConnect { engine: String, reason: String },

    #[error("Step '{step}' failed with exit code {exit_code}: {command}")]
    StepExecution {
        /// Name of the failing step (`install`, `lint`, `test`)
        step: String,
        /// Rendered command line of the failing step
        command: String,
        /// Non-zero exit status reported by the engine
        exit_code: i64,
        /// Captured stdout of the failing step
        stdout: String,
        /// Captured stderr of the failing step
        stderr: String,
    },

    #[error("Invalid project at {path:?}: {reason}")]
    InvalidProject { path: PathBuf, reason: String },

    #[error("Invalid mount configuration: {0}")]
    InvalidMount(String),

    #[error("Unknown task: {0} (expected 'lint' or 'test')")]
    UnknownTask(String),

    #[error("Image pull failed: {0}")]
    ImagePullFailed(String),

    #[error("Container execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RunnerError {
    /// Build an engine connection error.
    pub fn connect(engine: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EngineConnect {
            engine: engine.into(),
            reason: reason.into(),
        }
    }

    /// Build an invalid project error.
    pub fn invalid_project(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidProject {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the session could not be acquired.
    pub fn is_connect_error(&self) -> bool {
        matches!(self, Self::EngineConnect { .. })
    }

    /// Whether a plan step exited non-zero.
    pub fn is_step_failure(&self) -> bool {
        matches!(self, Self::StepExecution { .. })
    }

    /// Output written by the failing step, stdout first.
    pub fn failure_output(&self) -> Option<String> {
        match self {
            Self::StepExecution { stdout, stderr, .. } => {
                if stdout.is_empty() {
                    Some(stderr.clone())
                } else if stderr.is_empty() {
                    Some(stdout.clone())
                } else {
                    Some(format!("{}\n{}", stdout, stderr))
                }
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failure_output() {
        let err = RunnerError::StepExecution {
            step: "test".to_string(),
            command: "pytest".to_string(),
            exit_code: 1,
            stdout: "1 failed".to_string(),
            stderr: "AssertionError".to_string(),
        };

        assert!(err.is_step_failure());
        assert!(!err.is_connect_error());
        assert_eq!(err.failure_output().as_deref(), Some("1 failed\nAssertionError"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_connect_error() {
        let err = RunnerError::connect("docker", "connection refused");
        assert!(err.is_connect_error());
        assert!(err.failure_output().is_none());
        assert!(err.to_string().contains("connection refused"));
    }
}
