//! The pipeline runner: one parameterized procedure for every task.
//!
//! A run connects to the engine, declares the container from the plan, runs
//! the install step and the task step in order, and releases the session on
//! every exit path. The first error aborts the remaining steps.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::PipelineSettings;
use crate::container::{Container, SessionGuard, StepResult};
use crate::engine::{ConnectOptions, ContainerEngine, LogSink};
use crate::error::{RunnerError, RunnerResult};
use crate::plan::ExecutionPlan;
use crate::task::TaskName;

/// Per-invocation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Connecting,
    Mounting,
    Installing,
    Running,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::Idle
    }
}

struct StateTracker {
    task: TaskName,
    transitions: Vec<PipelineState>,
}

impl StateTracker {
    fn new(task: TaskName) -> Self {
        Self {
            task,
            transitions: vec![PipelineState::Idle],
        }
    }

    fn current(&self) -> PipelineState {
        self.transitions.last().copied().unwrap_or_default()
    }

    fn advance(&mut self, next: PipelineState) {
        debug!(task = %self.task, from = ?self.current(), to = ?next, "pipeline transition");
        self.transitions.push(next);
    }

    fn fail(&mut self, err: &RunnerError) {
        error!("{} pipeline failed while {:?}: {}", self.task, self.current(), err);
        self.advance(PipelineState::Failed);
    }
}

/// Outcome of a successful run with per-step diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub task: TaskName,
    pub image: String,
    /// Completed steps, install step included
    pub steps: Vec<StepResult>,
    /// States visited, `Idle` through `Completed`
    pub transitions: Vec<PipelineState>,
    /// Captured stdout of the final step
    pub output: String,
    pub duration_ms: u64,
}

/// Runs lint and test pipelines against a container engine.
///
/// Holds no per-run state: concurrent runs each open their own session and
/// build their own plan.
#[derive(Clone)]
pub struct PipelineRunner {
    engine: Arc<dyn ContainerEngine>,
    settings: PipelineSettings,
    options: ConnectOptions,
}

impl PipelineRunner {
    /// Runner with default settings and suppressed step output.
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            settings: PipelineSettings::default(),
            options: ConnectOptions::default(),
        }
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.options = self.options.log_sink(sink);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Build the plan for `task` without contacting the engine.
    pub fn plan(&self, task: TaskName, project_root: &Path) -> RunnerResult<ExecutionPlan> {
        self.settings.validate()?;
        let root = validate_project(project_root, &self.settings.manifest)?;
        Ok(ExecutionPlan::build(task, &self.settings, &root))
    }

    /// Run `task` and return the final step's stdout.
    pub async fn run(&self, task: TaskName, project_root: &Path) -> RunnerResult<String> {
        self.run_report(task, project_root)
            .await
            .map(|report| report.output)
    }

    /// Run the lint task.
    pub async fn lint(&self, project_root: &Path) -> RunnerResult<String> {
        self.run(TaskName::Lint, project_root).await
    }

    /// Run the test task.
    pub async fn test(&self, project_root: &Path) -> RunnerResult<String> {
        self.run(TaskName::Test, project_root).await
    }

    /// Run `task` and return every completed step along with the output.
    pub async fn run_report(&self, task: TaskName, project_root: &Path) -> RunnerResult<PipelineReport> {
        let plan = self.plan(task, project_root)?;
        let started_at = Utc::now();
        let mut tracker = StateTracker::new(task);

        info!(
            "Running {} on {} engine with {}",
            task,
            self.engine.name(),
            plan.image
        );

        tracker.advance(PipelineState::Connecting);
        let guard = match SessionGuard::acquire(self.engine.as_ref(), &self.options).await {
            Ok(guard) => guard,
            Err(e) => {
                tracker.fail(&e);
                return Err(e);
            }
        };

        let result = self.execute(&guard, &plan, &mut tracker).await;

        if let Err(e) = guard.release().await {
            warn!("Failed to release engine session: {}", e);
        }

        let container = match result {
            Ok(container) => container,
            Err(e) => {
                tracker.fail(&e);
                return Err(e);
            }
        };

        tracker.advance(PipelineState::Completed);
        let duration_ms = (Utc::now() - started_at).num_milliseconds().max(0) as u64;
        info!("{} pipeline completed in {}ms", task, duration_ms);

        let output = container.stdout().to_string();
        Ok(PipelineReport {
            task,
            image: plan.image,
            steps: container.into_results(),
            transitions: tracker.transitions,
            output,
            duration_ms,
        })
    }

    async fn execute(
        &self,
        guard: &SessionGuard,
        plan: &ExecutionPlan,
        tracker: &mut StateTracker,
    ) -> RunnerResult<Container> {
        tracker.advance(PipelineState::Mounting);
        let mut container = guard.container(plan.container_spec(&self.settings.name_prefix));

        let last = plan.steps.len().saturating_sub(1);
        for (index, step) in plan.steps.iter().enumerate() {
            let state = if index == last {
                PipelineState::Running
            } else {
                PipelineState::Installing
            };
            tracker.advance(state);
            let result = container.exec(step).await?;
            debug!("Step {} finished in {}ms", result.step, result.duration_ms);
        }

        Ok(container)
    }
}

/// Resolve the project root to an absolute directory holding the manifest.
pub fn validate_project(project_root: &Path, manifest: &str) -> RunnerResult<PathBuf> {
    let root = project_root.canonicalize().map_err(|e| {
        let reason = if e.kind() == ErrorKind::NotFound {
            "directory does not exist".to_string()
        } else {
            e.to_string()
        };
        RunnerError::invalid_project(project_root, reason)
    })?;

    if !root.is_dir() {
        return Err(RunnerError::invalid_project(root, "not a directory"));
    }
    if !root.join(manifest).is_file() {
        return Err(RunnerError::invalid_project(
            root,
            format!("missing dependency manifest {}", manifest),
        ));
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockEngine, MockResponse};

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements-dev.txt"), "ruff\npytest\n").unwrap();
        dir
    }

    #[test]
    fn test_validate_project() {
        let dir = project();
        let root = validate_project(dir.path(), "requirements-dev.txt").unwrap();
        assert!(root.is_absolute());

        let missing = validate_project(&dir.path().join("nope"), "requirements-dev.txt");
        assert!(matches!(missing, Err(RunnerError::InvalidProject { .. })));

        let no_manifest = validate_project(dir.path(), "requirements.txt");
        assert!(matches!(no_manifest, Err(RunnerError::InvalidProject { reason, .. }) if reason.contains("requirements.txt")));

        let file = validate_project(&dir.path().join("requirements-dev.txt"), "requirements-dev.txt");
        assert!(matches!(file, Err(RunnerError::InvalidProject { reason, .. }) if reason == "not a directory"));
    }

    #[tokio::test]
    async fn test_report_transitions() {
        let dir = project();
        let engine = MockEngine::new().respond_to("pytest", MockResponse::success("2 passed"));
        let runner = PipelineRunner::new(Arc::new(engine.clone()));

        let report = runner.run_report(TaskName::Test, dir.path()).await.unwrap();

        assert_eq!(
            report.transitions,
            vec![
                PipelineState::Idle,
                PipelineState::Connecting,
                PipelineState::Mounting,
                PipelineState::Installing,
                PipelineState::Running,
                PipelineState::Completed,
            ]
        );
        assert!(report.transitions.last().unwrap().is_terminal());
        assert_eq!(report.output, "2 passed");
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].step, "install");
    }

    #[tokio::test]
    async fn test_invalid_project_never_connects() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MockEngine::new();
        let runner = PipelineRunner::new(Arc::new(engine.clone()));

        let result = runner.run(TaskName::Lint, dir.path()).await;

        assert!(matches!(result, Err(RunnerError::InvalidProject { .. })));
        assert_eq!(engine.call_count(), 0);
    }
}
