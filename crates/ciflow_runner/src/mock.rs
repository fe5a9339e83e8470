//! Mock container engine for testing.
//!
//! Provides a scripted implementation of [`ContainerEngine`] for use in
//! tests without requiring actual Docker/Podman.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::config::{ContainerSpec, MountConfig};
use crate::engine::{ConnectOptions, ContainerEngine, EngineSession, ExecOutput, ExecRequest};
use crate::error::{RunnerError, RunnerResult};

/// Predefined mock response for an exec.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Sleep this long before answering.
    pub delay: Option<Duration>,
    /// Never answer.
    pub hang: bool,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 100,
            delay: None,
            hang: false,
        }
    }

    pub fn failure(exit_code: i64, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 100,
            delay: None,
            hang: false,
        }
    }

    /// A step that never finishes.
    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Self::success("")
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    pub session_id: String,
    pub image: Option<String>,
    pub command: Option<Vec<String>>,
    pub workdir: Option<String>,
    pub mounts: Vec<MountConfig>,
}

impl CapturedCall {
    fn new(method: &str, session_id: &str) -> Self {
        Self {
            method: method.to_string(),
            session_id: session_id.to_string(),
            image: None,
            command: None,
            workdir: None,
            mounts: Vec::new(),
        }
    }
}

#[derive(Default)]
struct MockState {
    unavailable: AtomicBool,
    connect_failure: RwLock<Option<String>>,
    start_failure: RwLock<Option<String>>,
    close_delay: RwLock<Option<Duration>>,
    responses: RwLock<Vec<(String, MockResponse)>>,
    captured_calls: RwLock<Vec<CapturedCall>>,
    connects: AtomicUsize,
    close_calls: AtomicUsize,
    releases: AtomicUsize,
    containers: AtomicUsize,
}

/// Mock container engine for testing.
///
/// Responses are matched against the executed command line; the first
/// registered pattern contained in it wins, anything else succeeds with empty
/// output. Clones share state, so a test keeps one clone for assertions and
/// hands another to the runner.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<MockState>,
}

impl MockEngine {
    /// Create a new mock engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the engine reports as available.
    pub fn set_available(self, available: bool) -> Self {
        self.state.unavailable.store(!available, Ordering::SeqCst);
        self
    }

    /// Answer commands containing `pattern` with `response`.
    pub fn respond_to(self, pattern: impl Into<String>, response: MockResponse) -> Self {
        self.state.responses.write().push((pattern.into(), response));
        self
    }

    /// Make every connect fail.
    pub fn fail_connect(self, message: impl Into<String>) -> Self {
        *self.state.connect_failure.write() = Some(message.into());
        self
    }

    /// Make every container start fail.
    pub fn fail_start(self, message: impl Into<String>) -> Self {
        *self.state.start_failure.write() = Some(message.into());
        self
    }

    /// Make every close take `delay` before tearing the session down.
    pub fn with_close_delay(self, delay: Duration) -> Self {
        *self.state.close_delay.write() = Some(delay);
        self
    }

    /// Clear all captured calls.
    pub fn clear_calls(&self) {
        self.state.captured_calls.write().clear();
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.state.captured_calls.read().clone()
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.state.captured_calls.read().len()
    }

    /// Check if a specific method was called.
    pub fn was_called(&self, method: &str) -> bool {
        self.state
            .captured_calls
            .read()
            .iter()
            .any(|c| c.method == method)
    }

    /// Get calls to a specific method.
    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.state
            .captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Commands executed, in order.
    pub fn executed_commands(&self) -> Vec<Vec<String>> {
        self.get_method_calls("exec")
            .into_iter()
            .filter_map(|c| c.command)
            .collect()
    }

    /// Successful connects.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Every `close` call, including repeated ones.
    pub fn close_count(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    /// Sessions actually torn down.
    pub fn release_count(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    fn record_call(&self, call: CapturedCall) {
        self.state.captured_calls.write().push(call);
    }

    fn response_for(&self, argv: &[String]) -> MockResponse {
        let command = argv.join(" ");
        self.state
            .responses
            .read()
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| MockResponse::success(""))
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn is_available(&self) -> bool {
        !self.state.unavailable.load(Ordering::SeqCst)
    }

    async fn connect(&self, _options: &ConnectOptions) -> RunnerResult<Arc<dyn EngineSession>> {
        let attempt = self.state.connects.load(Ordering::SeqCst);
        self.record_call(CapturedCall::new("connect", &format!("mock-session-{}", attempt)));

        if let Some(msg) = self.state.connect_failure.read().clone() {
            return Err(RunnerError::connect("mock", msg));
        }

        let n = self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            id: format!("mock-session-{}", n),
            engine: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockSession {
    id: String,
    engine: MockEngine,
    closed: AtomicBool,
}

#[async_trait]
impl EngineSession for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start_container(&self, spec: &ContainerSpec) -> RunnerResult<String> {
        let mut call = CapturedCall::new("start_container", &self.id);
        call.image = Some(spec.image.clone());
        call.workdir = spec.workdir.clone();
        call.mounts = spec.mounts.clone();
        self.engine.record_call(call);

        if let Some(msg) = self.engine.state.start_failure.read().clone() {
            return Err(RunnerError::ExecutionFailed(msg));
        }

        let n = self.engine.state.containers.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mock-container-{}", n))
    }

    async fn exec(&self, container_id: &str, request: &ExecRequest) -> RunnerResult<ExecOutput> {
        let mut call = CapturedCall::new("exec", &self.id);
        call.image = Some(container_id.to_string());
        call.command = Some(request.argv.clone());
        call.workdir = request.workdir.clone();
        self.engine.record_call(call);

        let response = self.engine.response_for(&request.argv);
        if response.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }

        let started_at = Utc::now();
        let finished_at = started_at + chrono::Duration::milliseconds(response.duration_ms as i64);
        Ok(ExecOutput {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at,
            finished_at,
            duration_ms: response.duration_ms,
        })
    }

    async fn close(&self) -> RunnerResult<()> {
        self.engine.state.close_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.engine.state.close_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.engine.state.releases.fetch_add(1, Ordering::SeqCst);
            self.engine.record_call(CapturedCall::new("close", &self.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec_request(argv: &[&str]) -> ExecRequest {
        ExecRequest {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            workdir: Some("/src".to_string()),
            env: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_mock_engine_matches_responses() {
        let engine = MockEngine::new()
            .respond_to("pytest", MockResponse::failure(1, "1 failed"))
            .respond_to("ruff", MockResponse::success("All checks passed!"));

        let session = engine.connect(&ConnectOptions::default()).await.unwrap();
        let id = session
            .start_container(&ContainerSpec::new("python:3.11-slim"))
            .await
            .unwrap();

        let lint = session.exec(&id, &exec_request(&["ruff", "check", "."])).await.unwrap();
        assert_eq!(lint.stdout, "All checks passed!");

        let test = session.exec(&id, &exec_request(&["pytest"])).await.unwrap();
        assert_eq!(test.exit_code, 1);

        let other = session.exec(&id, &exec_request(&["pip", "install"])).await.unwrap();
        assert!(other.success());
        assert!(other.stdout.is_empty());

        assert_eq!(engine.executed_commands().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_engine_close_is_idempotent() {
        let engine = MockEngine::new();
        let session = engine.connect(&ConnectOptions::default()).await.unwrap();

        session.close().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(engine.close_count(), 2);
        assert_eq!(engine.release_count(), 1);
        assert_eq!(engine.get_method_calls("close").len(), 1);
    }

    #[tokio::test]
    async fn test_mock_engine_connect_failure() {
        let engine = MockEngine::new().fail_connect("connection refused");
        let result = engine.connect(&ConnectOptions::default()).await;

        assert!(matches!(result, Err(RunnerError::EngineConnect { .. })));
        assert_eq!(engine.connect_count(), 0);
        assert!(engine.was_called("connect"));
    }

    #[tokio::test]
    async fn test_mock_engine_availability() {
        assert!(MockEngine::new().is_available().await);
        assert!(!MockEngine::new().set_available(false).is_available().await);
    }
}
