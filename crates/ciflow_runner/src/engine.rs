//! Container engine traits and types.
//!
//! An engine hands out sessions; a session starts containers, runs commands
//! inside them and tears everything down on `close`.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ContainerSpec;
use crate::error::RunnerResult;

/// Result of one command executed in a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Exit code of the command
    pub exit_code: i64,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Execution start time
    pub started_at: DateTime<Utc>,
    /// Execution end time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ExecOutput {
    /// Check if execution was successful (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// A command to run inside a started container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    pub workdir: Option<String>,
    pub env: Vec<String>,
}

/// Output stream of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One line of step output.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub step: String,
    pub stream: LogStream,
    pub message: String,
}

/// Log handler callback type.
pub type LogHandler = Arc<dyn Fn(LogLine) + Send + Sync>;

/// Where step output goes while a pipeline runs.
#[derive(Clone, Default)]
pub enum LogSink {
    /// Drop step output.
    #[default]
    Suppressed,
    /// Emit each line as a `tracing` event.
    Tracing,
    /// Hand each line to a callback.
    Handler(LogHandler),
}

impl LogSink {
    /// Forward every line of `text` to the sink.
    pub fn emit(&self, step: &str, stream: LogStream, text: &str) {
        if matches!(self, Self::Suppressed) {
            return;
        }
        for message in text.lines() {
            let line = LogLine {
                timestamp: Utc::now(),
                step: step.to_string(),
                stream,
                message: message.to_string(),
            };
            match self {
                Self::Suppressed => {}
                Self::Tracing => info!(step = %line.step, stream = %line.stream, "{}", line.message),
                Self::Handler(handler) => handler(line),
            }
        }
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self, Self::Suppressed)
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suppressed => write!(f, "Suppressed"),
            Self::Tracing => write!(f, "Tracing"),
            Self::Handler(_) => write!(f, "Handler(..)"),
        }
    }
}

/// Options for acquiring a session.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub log_sink: LogSink,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = sink;
        self
    }
}

/// A backend able to run containers.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Short engine name for messages.
    fn name(&self) -> &str;

    /// Check if the backend is reachable.
    async fn is_available(&self) -> bool;

    /// Acquire a session. Fails with `RunnerError::EngineConnect`.
    async fn connect(&self, options: &ConnectOptions) -> RunnerResult<Arc<dyn EngineSession>>;
}

/// A live connection to an engine, scoped to one pipeline run.
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Session identifier for logs.
    fn id(&self) -> &str;

    /// Create and start a container, returning its id.
    async fn start_container(&self, spec: &ContainerSpec) -> RunnerResult<String>;

    /// Run a command in a started container.
    ///
    /// A non-zero exit is reported in `ExecOutput`, not as an error.
    async fn exec(&self, container_id: &str, request: &ExecRequest) -> RunnerResult<ExecOutput>;

    /// Remove everything the session started. Idempotent.
    async fn close(&self) -> RunnerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_log_sink_handler_splits_lines() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let captured = lines.clone();
        let sink = LogSink::Handler(Arc::new(move |line: LogLine| {
            captured.lock().push((line.step, line.stream, line.message));
        }));

        sink.emit("install", LogStream::Stdout, "Collecting ruff\nInstalled ruff\n");
        sink.emit("install", LogStream::Stderr, "WARNING: root user");

        let lines = lines.lock();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], ("install".to_string(), LogStream::Stdout, "Collecting ruff".to_string()));
        assert_eq!(lines[2].1, LogStream::Stderr);
    }

    #[test]
    fn test_exec_output_combined() {
        let now = Utc::now();
        let output = ExecOutput {
            exit_code: 0,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        };
        assert!(output.success());
        assert_eq!(output.combined_output(), "out\nerr");
        assert!(LogSink::default().is_suppressed());
    }
}
