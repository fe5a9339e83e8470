//! Scoped engine sessions and the container handle steps run through.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::{ContainerSpec, MountConfig};
use crate::engine::{ConnectOptions, ContainerEngine, EngineSession, ExecRequest, LogSink, LogStream};
use crate::error::{RunnerError, RunnerResult};
use crate::plan::Step;

/// A step that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub command: String,
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// An engine session that is released exactly once.
///
/// Call [`SessionGuard::release`] on every normal path. If the guard is
/// dropped unreleased (cancelled future, panic) the close is spawned on the
/// current tokio runtime.
pub struct SessionGuard {
    engine: String,
    session: Arc<dyn EngineSession>,
    log_sink: LogSink,
    released: bool,
}

impl SessionGuard {
    /// Connect to `engine` and wrap the session.
    pub async fn acquire(engine: &dyn ContainerEngine, options: &ConnectOptions) -> RunnerResult<Self> {
        debug!("Connecting to {} engine", engine.name());
        let session = engine.connect(options).await?;
        debug!("Acquired session {}", session.id());
        Ok(Self {
            engine: engine.name().to_string(),
            session,
            log_sink: options.log_sink.clone(),
            released: false,
        })
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    /// Start declaring a container from an image reference.
    pub fn image(&self, reference: impl Into<String>) -> Container {
        Container::new(self.session.clone(), self.log_sink.clone(), reference)
    }

    /// Start declaring a container from a full spec.
    pub fn container(&self, spec: ContainerSpec) -> Container {
        Container::from_spec(self.session.clone(), self.log_sink.clone(), spec)
    }

    /// Close the session. The guard stays armed until the close returns.
    pub async fn release(mut self) -> RunnerResult<()> {
        debug!("Releasing session {}", self.session.id());
        let result = self.session.close().await;
        self.released = true;
        result
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let session = self.session.clone();
        warn!("Session {} dropped before release, closing in background", session.id());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        error!("Failed to close session {}: {}", session.id(), e);
                    }
                });
            }
            Err(_) => error!("No tokio runtime, session {} leaked", session.id()),
        }
    }
}

/// Handle to a container declared on a session.
///
/// Mounts and working directory are declarative until the first exec starts
/// the engine container; mounts added after that are rejected.
pub struct Container {
    session: Arc<dyn EngineSession>,
    log_sink: LogSink,
    spec: ContainerSpec,
    container_id: Option<String>,
    started_mounts: usize,
    results: Vec<StepResult>,
}

impl Container {
    fn new(session: Arc<dyn EngineSession>, log_sink: LogSink, reference: impl Into<String>) -> Self {
        Self::from_spec(session, log_sink, ContainerSpec::new(reference))
    }

    fn from_spec(session: Arc<dyn EngineSession>, log_sink: LogSink, spec: ContainerSpec) -> Self {
        Self {
            session,
            log_sink,
            spec,
            container_id: None,
            started_mounts: 0,
            results: Vec::new(),
        }
    }

    /// Bind `host_path` read-only at `container_path`.
    pub fn with_mounted_directory(mut self, host_path: &Path, container_path: impl Into<String>) -> Self {
        self.spec = self
            .spec
            .mount(MountConfig::new(host_path, container_path).read_only());
        self
    }

    pub fn with_workdir(mut self, path: impl Into<String>) -> Self {
        self.spec = self.spec.workdir(path);
        self
    }

    /// Run a step and keep chaining.
    pub async fn with_exec(mut self, step: Step) -> RunnerResult<Self> {
        self.exec(&step).await?;
        Ok(self)
    }

    /// Run a step. A non-zero exit becomes `RunnerError::StepExecution`.
    pub async fn exec(&mut self, step: &Step) -> RunnerResult<StepResult> {
        if step.argv.is_empty() {
            return Err(RunnerError::ExecutionFailed(format!(
                "step '{}' has no command",
                step.name
            )));
        }

        let container_id = self.ensure_started().await?;
        let request = ExecRequest {
            argv: step.argv.clone(),
            workdir: self.spec.workdir.clone(),
            env: self.spec.env_pairs(),
        };

        debug!("Executing step {} in {}", step, container_id);
        let output = self.session.exec(&container_id, &request).await?;

        self.log_sink.emit(&step.name, LogStream::Stdout, &output.stdout);
        self.log_sink.emit(&step.name, LogStream::Stderr, &output.stderr);

        if !output.success() {
            return Err(RunnerError::StepExecution {
                step: step.name.clone(),
                command: step.command_line(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        let result = StepResult {
            step: step.name.clone(),
            command: step.command_line(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.duration_ms,
        };
        self.results.push(result.clone());
        Ok(result)
    }

    async fn ensure_started(&mut self) -> RunnerResult<String> {
        if let Some(id) = &self.container_id {
            if self.spec.mounts.len() != self.started_mounts {
                return Err(RunnerError::InvalidMount(format!(
                    "container {} is already running, mounts must be declared before the first exec",
                    id
                )));
            }
            return Ok(id.clone());
        }

        let id = self.session.start_container(&self.spec).await?;
        self.started_mounts = self.spec.mounts.len();
        self.container_id = Some(id.clone());
        Ok(id)
    }

    /// Captured stdout of the last executed step.
    pub fn stdout(&self) -> &str {
        self.results.last().map_or("", |r| r.stdout.as_str())
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    /// Completed steps in execution order.
    pub fn results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<StepResult> {
        self.results
    }
}
