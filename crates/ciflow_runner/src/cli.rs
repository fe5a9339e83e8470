//! CLI-based container engine supporting Docker and Podman.
//!
//! This module drives the `docker` or `podman` binary, with automatic
//! detection and a dry-run mode that prints commands instead of running them.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ContainerSpec;
use crate::engine::{ConnectOptions, ContainerEngine, EngineSession, ExecOutput, ExecRequest};
use crate::error::{RunnerError, RunnerResult};

/// Container runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Get the CLI command name.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

impl std::fmt::Display for ContainerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command())
    }
}

impl std::str::FromStr for ContainerRuntime {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "podman" => Ok(Self::Podman),
            other => Err(RunnerError::Config(format!("unknown container runtime '{}'", other))),
        }
    }
}

/// CLI-based engine options.
#[derive(Debug, Clone, Default)]
pub struct CliEngineOptions {
    /// Preferred runtime (if not set, auto-detect)
    pub preferred_runtime: Option<ContainerRuntime>,
    /// Dry-run mode (print commands without executing)
    pub dry_run: bool,
}

impl CliEngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn prefer_podman(mut self) -> Self {
        self.preferred_runtime = Some(ContainerRuntime::Podman);
        self
    }

    pub fn prefer(mut self, runtime: Option<ContainerRuntime>) -> Self {
        self.preferred_runtime = runtime;
        self
    }
}

/// CLI-based container engine.
#[derive(Debug, Clone, Default)]
pub struct CliEngine {
    options: CliEngineOptions,
}

impl CliEngine {
    pub fn new(options: CliEngineOptions) -> Self {
        Self { options }
    }

    /// Check if dry-run mode is enabled.
    pub fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }

    /// Detect available container runtime.
    pub async fn detect_runtime(options: &CliEngineOptions) -> RunnerResult<ContainerRuntime> {
        // Check preferred runtime first
        if let Some(preferred) = options.preferred_runtime {
            if Self::is_runtime_available(preferred).await {
                return Ok(preferred);
            }
            warn!(
                "Preferred runtime {} not available, trying alternatives",
                preferred
            );
        }

        for runtime in [ContainerRuntime::Docker, ContainerRuntime::Podman] {
            if Some(runtime) != options.preferred_runtime && Self::is_runtime_available(runtime).await {
                return Ok(runtime);
            }
        }

        Err(RunnerError::connect(
            "cli",
            "Neither Docker nor Podman is available",
        ))
    }

    /// Check if a runtime binary answers `version` (which also reaches the daemon).
    async fn is_runtime_available(runtime: ContainerRuntime) -> bool {
        Command::new(runtime.command())
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Runtime version string, e.g. `docker 24.0.7`.
    pub async fn version(&self) -> RunnerResult<String> {
        let runtime = Self::detect_runtime(&self.options).await?;
        let output = Command::new(runtime.command())
            .args(["version", "--format", "{{.Server.Version}}"])
            .output()
            .await
            .map_err(|e| RunnerError::ExecutionFailed(e.to_string()))?;

        if output.status.success() {
            Ok(format!("{} {}", runtime, String::from_utf8_lossy(&output.stdout).trim()))
        } else {
            Err(RunnerError::ExecutionFailed(
                String::from_utf8_lossy(&output.stderr).to_string(),
            ))
        }
    }
}

#[async_trait]
impl ContainerEngine for CliEngine {
    fn name(&self) -> &str {
        "cli"
    }

    async fn is_available(&self) -> bool {
        self.options.dry_run || Self::detect_runtime(&self.options).await.is_ok()
    }

    async fn connect(&self, _options: &ConnectOptions) -> RunnerResult<Arc<dyn EngineSession>> {
        let runtime = if self.options.dry_run {
            self.options.preferred_runtime.unwrap_or(ContainerRuntime::Docker)
        } else {
            Self::detect_runtime(&self.options).await?
        };
        info!("Using container runtime: {}", runtime);

        Ok(Arc::new(CliSession::new(runtime, self.options.dry_run)))
    }
}

/// Session over the `docker` / `podman` binary.
pub struct CliSession {
    id: String,
    runtime: ContainerRuntime,
    program: String,
    dry_run: bool,
    containers: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl CliSession {
    pub fn new(runtime: ContainerRuntime, dry_run: bool) -> Self {
        Self {
            id: format!("{}-{}", runtime, &Uuid::new_v4().to_string()[..8]),
            runtime,
            program: runtime.command().to_string(),
            dry_run,
            containers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Invoke `program` instead of the runtime's binary on `PATH`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    /// Arguments for starting the long-lived step container.
    pub fn build_run_args(&self, spec: &ContainerSpec, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            name.to_string(),
        ];

        // Working directory
        if let Some(workdir) = &spec.workdir {
            args.push("-w".to_string());
            args.push(workdir.clone());
        }

        // Environment variables
        for pair in spec.env_pairs() {
            args.push("-e".to_string());
            args.push(pair);
        }

        // Volume mounts
        for mount in &spec.mounts {
            args.push("-v".to_string());
            args.push(mount.volume_spec());
        }

        args.push("--entrypoint".to_string());
        args.push("sleep".to_string());
        args.push(spec.image.clone());
        args.push("infinity".to_string());

        args
    }

    /// Arguments for running one step in a started container.
    pub fn build_exec_args(&self, container_id: &str, request: &ExecRequest) -> Vec<String> {
        let mut args = vec!["exec".to_string()];

        if let Some(workdir) = &request.workdir {
            args.push("-w".to_string());
            args.push(workdir.clone());
        }

        for pair in &request.env {
            args.push("-e".to_string());
            args.push(pair.clone());
        }

        args.push(container_id.to_string());
        args.extend(request.argv.iter().cloned());
        args
    }

    /// Format command for logging.
    pub fn format_command(&self, args: &[String]) -> String {
        let mut cmd = self.runtime.command().to_string();
        for arg in args {
            if arg.contains(' ') || arg.contains('=') {
                cmd.push_str(&format!(" '{}'", arg));
            } else {
                cmd.push_str(&format!(" {}", arg));
            }
        }
        cmd
    }

    async fn run_command(&self, args: &[String]) -> RunnerResult<(i64, String, String)> {
        debug!("Executing: {}", self.format_command(args));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                RunnerError::ExecutionFailed(format!("Failed to spawn {}: {}", self.runtime, e))
            })?;

        Ok((
            output.status.code().unwrap_or(-1) as i64,
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
        ))
    }
}

#[async_trait]
impl EngineSession for CliSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start_container(&self, spec: &ContainerSpec) -> RunnerResult<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RunnerError::ExecutionFailed(format!("session {} is closed", self.id)));
        }

        let name = format!(
            "{}-{}",
            spec.name_prefix.as_deref().unwrap_or("ciflow"),
            &Uuid::new_v4().to_string()[..8]
        );
        let args = self.build_run_args(spec, &name);

        if self.dry_run {
            info!("[DRY-RUN] Would execute: {}", self.format_command(&args));
            return Ok(name);
        }

        info!("Starting container {} from {}", name, spec.image);
        // A failed `run` can still leave a created container behind.
        self.containers.lock().push(name.clone());
        let (exit_code, _, stderr) = self.run_command(&args).await?;
        if exit_code != 0 {
            return Err(RunnerError::ExecutionFailed(format!(
                "{} run exited with code {}: {}",
                self.runtime,
                exit_code,
                stderr.lines().last().unwrap_or("Unknown error")
            )));
        }

        Ok(name)
    }

    async fn exec(&self, container_id: &str, request: &ExecRequest) -> RunnerResult<ExecOutput> {
        let args = self.build_exec_args(container_id, request);
        let started_at = Utc::now();

        if self.dry_run {
            let cmd_str = self.format_command(&args);
            info!("[DRY-RUN] Would execute: {}", cmd_str);
            return Ok(ExecOutput {
                exit_code: 0,
                stdout: format!("[DRY-RUN] Command: {}", cmd_str),
                stderr: String::new(),
                started_at,
                finished_at: started_at,
                duration_ms: 0,
            });
        }

        let (exit_code, stdout, stderr) = self.run_command(&args).await?;
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        if exit_code == 0 {
            debug!("Exec completed successfully in {}ms", duration_ms);
        } else {
            warn!("Exec exited with code {} after {}ms", exit_code, duration_ms);
        }

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
            started_at,
            finished_at,
            duration_ms,
        })
    }

    async fn close(&self) -> RunnerResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let containers: Vec<String> = self.containers.lock().drain(..).collect();
        let mut first_error = None;
        for name in containers {
            let args = vec!["rm".to_string(), "-f".to_string(), name.clone()];
            let error = match self.run_command(&args).await {
                Ok((0, _, _)) => {
                    debug!("Removed container {}", name);
                    continue;
                }
                Ok((exit_code, _, stderr)) => RunnerError::ExecutionFailed(format!(
                    "failed to remove container {} (exit {}): {}",
                    name,
                    exit_code,
                    stderr.trim()
                )),
                Err(e) => e,
            };
            warn!("{}", error);
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MountConfig;
    use std::path::PathBuf;

    #[test]
    fn test_build_run_args() {
        let session = CliSession::new(ContainerRuntime::Docker, false);
        let spec = ContainerSpec::new("python:3.11-slim")
            .workdir("/src")
            .env("PYTHONUNBUFFERED", "1")
            .mount(MountConfig::new(PathBuf::from("/host"), "/src").read_only());

        let args = session.build_run_args(&spec, "ciflow-test");

        assert_eq!(&args[..4], &["run", "-d", "--name", "ciflow-test"]);
        assert!(args.windows(2).any(|w| w == ["-w", "/src"]));
        assert!(args.windows(2).any(|w| w == ["-v", "/host:/src:ro"]));
        assert!(args.windows(2).any(|w| w == ["-e", "PYTHONUNBUFFERED=1"]));
        assert_eq!(&args[args.len() - 2..], &["python:3.11-slim", "infinity"]);
    }

    #[test]
    fn test_build_exec_args() {
        let session = CliSession::new(ContainerRuntime::Podman, false);
        let request = ExecRequest {
            argv: vec!["ruff".into(), "check".into(), ".".into()],
            workdir: Some("/src".into()),
            env: vec![],
        };

        let args = session.build_exec_args("abc123", &request);
        assert_eq!(args, vec!["exec", "-w", "/src", "abc123", "ruff", "check", "."]);
        assert_eq!(
            session.format_command(&args),
            "podman exec -w /src abc123 ruff check ."
        );
    }

    #[tokio::test]
    async fn test_dry_run_session() {
        let engine = CliEngine::new(CliEngineOptions::new().dry_run().prefer_podman());
        assert!(engine.is_dry_run());
        assert!(engine.is_available().await);

        let session = engine.connect(&ConnectOptions::default()).await.unwrap();
        let id = session
            .start_container(&ContainerSpec::new("python:3.11-slim").name_prefix("lint"))
            .await
            .unwrap();
        assert!(id.starts_with("lint-"));

        let request = ExecRequest {
            argv: vec!["pytest".into()],
            workdir: Some("/src".into()),
            env: vec![],
        };
        let output = session.exec(&id, &request).await.unwrap();
        assert!(output.success());
        assert!(output.stdout.starts_with("[DRY-RUN] Command: podman exec"));

        session.close().await.unwrap();
        session.close().await.unwrap();
    }

    /// Shell script standing in for the runtime binary. Every invocation is
    /// appended to `calls.log`; `run` and `rm` exit with the given codes.
    #[cfg(unix)]
    fn fake_runtime(dir: &std::path::Path, run_exit: i32, rm_exit: i32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("docker");
        let log = dir.join("calls.log");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho \"$@\" >> '{log}'\ncase \"$1\" in\n  run) exit {run_exit} ;;\n  rm) exit {rm_exit} ;;\nesac\nexit 0\n",
                log = log.display(),
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    fn logged_calls(dir: &std::path::Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_start_is_removed_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_runtime(dir.path(), 127, 0);
        let session = CliSession::new(ContainerRuntime::Docker, false)
            .with_program(program.to_string_lossy());

        let result = session
            .start_container(&ContainerSpec::new("python:3.11-slim").name_prefix("lint"))
            .await;
        assert!(matches!(result, Err(RunnerError::ExecutionFailed(_))));

        session.close().await.unwrap();

        let calls = logged_calls(dir.path());
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("run -d --name lint-"));
        let name = calls[0].split_whitespace().nth(3).unwrap();
        assert_eq!(calls[1], format!("rm -f {}", name));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_attempts_every_container() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_runtime(dir.path(), 0, 1);
        let session = CliSession::new(ContainerRuntime::Docker, false)
            .with_program(program.to_string_lossy());

        let first = session
            .start_container(&ContainerSpec::new("python:3.11-slim"))
            .await
            .unwrap();
        let second = session
            .start_container(&ContainerSpec::new("python:3.11-slim"))
            .await
            .unwrap();

        let err = session.close().await.unwrap_err();
        assert!(err.to_string().contains(&first));

        let calls = logged_calls(dir.path());
        assert!(calls.contains(&format!("rm -f {}", first)));
        assert!(calls.contains(&format!("rm -f {}", second)));

        session.close().await.unwrap();
        assert_eq!(logged_calls(dir.path()).len(), 4);
    }

    #[test]
    fn test_runtime_parse_and_display() {
        assert_eq!("Docker".parse::<ContainerRuntime>().unwrap(), ContainerRuntime::Docker);
        assert_eq!(format!("{}", ContainerRuntime::Podman), "podman");
        assert!("containerd".parse::<ContainerRuntime>().is_err());
    }
}
