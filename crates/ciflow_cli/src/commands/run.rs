//! Lint and test commands - run one pipeline and print its output.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, ValueEnum};
use tracing::{info, warn};

use ciflow_runner::{
    CliEngine, CliEngineOptions, ContainerEngine, ContainerRuntime, DockerEngine, LogLine,
    LogSink, LogStream, PipelineRunner, TaskName,
};

use super::{load_settings, resolve_path};

/// Which engine executes the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    /// Docker API if reachable, otherwise the docker/podman binary
    Auto,
    /// Docker Engine API
    Docker,
    /// docker/podman command line
    Cli,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RuntimeArg {
    Docker,
    Podman,
}

impl From<RuntimeArg> for ContainerRuntime {
    fn from(arg: RuntimeArg) -> Self {
        match arg {
            RuntimeArg::Docker => ContainerRuntime::Docker,
            RuntimeArg::Podman => ContainerRuntime::Podman,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the project root
    #[arg(short, long, default_value = ".")]
    path: PathBuf,

    /// Container engine
    #[arg(long, value_enum, default_value_t = EngineKind::Auto)]
    engine: EngineKind,

    /// Preferred runtime for the cli engine
    #[arg(long, value_enum)]
    runtime: Option<RuntimeArg>,

    /// Print container commands instead of running them
    #[arg(long)]
    dry_run: bool,

    /// Pipeline settings file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the base image
    #[arg(long)]
    image: Option<String>,

    /// Stream step output to stderr while running
    #[arg(long)]
    show_logs: bool,

    /// Output format (text, json)
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

pub async fn execute(task: TaskName, args: RunArgs) -> Result<()> {
    let project = resolve_path(&args.path)?;
    info!("Running {} on {:?}", task, project);

    let settings = load_settings(args.config.as_deref(), args.image.as_deref())?;
    let engine = select_engine(&args).await;

    let mut runner = PipelineRunner::new(engine).with_settings(settings);
    if args.show_logs {
        runner = runner.with_log_sink(console_sink(std::env::var("CI").is_ok()));
    }

    match runner.run_report(task, &project).await {
        Ok(report) => {
            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print!("{}", report.output),
            }
            Ok(())
        }
        Err(e) => {
            if let Some(output) = e.failure_output() {
                print!("{}", output);
            }
            Err(e.into())
        }
    }
}

async fn select_engine(args: &RunArgs) -> Arc<dyn ContainerEngine> {
    let cli_options = CliEngineOptions::new().prefer(args.runtime.map(Into::into));
    let cli_options = if args.dry_run {
        cli_options.dry_run()
    } else {
        cli_options
    };

    if args.dry_run {
        if args.engine == EngineKind::Docker {
            warn!("--dry-run uses the cli engine");
        }
        return Arc::new(CliEngine::new(cli_options));
    }

    match args.engine {
        EngineKind::Docker => Arc::new(DockerEngine::new()),
        EngineKind::Cli => Arc::new(CliEngine::new(cli_options)),
        EngineKind::Auto => {
            let docker = DockerEngine::new();
            if docker.is_available().await {
                Arc::new(docker)
            } else {
                info!("Docker API unreachable, falling back to the container CLI");
                Arc::new(CliEngine::new(cli_options))
            }
        }
    }
}

/// Step output on stderr, timestamped in CI.
fn console_sink(ci_mode: bool) -> LogSink {
    LogSink::Handler(Arc::new(move |line: LogLine| {
        if ci_mode {
            // GitHub Actions compatible format
            eprintln!(
                "[{}] [{}] [{}] {}",
                line.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                line.step,
                line.stream,
                line.message
            );
        } else {
            match line.stream {
                LogStream::Stdout => eprintln!("{} | {}", line.step, line.message),
                LogStream::Stderr => eprintln!("{} ! {}", line.step, line.message),
            }
        }
    }))
}
