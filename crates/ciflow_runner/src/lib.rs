//! # ciflow_runner
//!
//! Runs a project's linter and test suite inside ephemeral containers.
//!
//! Each run builds an [`ExecutionPlan`] (base image, read-only project
//! mount, install step, task step), executes it on a [`ContainerEngine`]
//! session and returns the final step's stdout. The session is released on
//! every exit path and the first failing step aborts the run.
//!
//! # Features
//!
//! - **Engines**: Docker API (bollard), CLI wrapper (docker/podman), mock
//! - **Runtime Detection**: Auto-detect Docker vs Podman
//! - **Dry-Run Mode**: Print container commands without execution
//! - **Reports**: Per-step results and state transitions
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use ciflow_runner::{DockerEngine, PipelineRunner, TaskName};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = PipelineRunner::new(Arc::new(DockerEngine::new()));
//!     let output = runner.run(TaskName::Lint, Path::new(".")).await?;
//!     println!("{}", output);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod container;
pub mod docker;
pub mod engine;
pub mod error;
pub mod mock;
pub mod pipeline;
pub mod plan;
pub mod task;

pub use cli::{CliEngine, CliEngineOptions, CliSession, ContainerRuntime};
pub use config::{ContainerSpec, MountConfig, PipelineSettings, TaskRecipe};
pub use container::{Container, SessionGuard, StepResult};
pub use docker::{DockerEngine, DockerHost};
pub use engine::{
    ConnectOptions, ContainerEngine, EngineSession, ExecOutput, ExecRequest, LogHandler, LogLine,
    LogSink, LogStream,
};
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockEngine, MockResponse};
pub use pipeline::{validate_project, PipelineReport, PipelineRunner, PipelineState};
pub use plan::{ExecutionPlan, Step};
pub use task::TaskName;
