//! ciflow CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid project or arguments
//! - 3: Engine connection failure
//! - 4: Step execution failure

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ciflow_runner::RunnerError;

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const ENGINE_CONNECT: u8 = 3;
    pub const STEP_FAILURE: u8 = 4;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Lint(args) => commands::run::execute(ciflow_runner::TaskName::Lint, args).await,
        Commands::Test(args) => commands::run::execute(ciflow_runner::TaskName::Test, args).await,
        Commands::Plan(args) => commands::plan::execute(args),
        Commands::Engines => commands::engines::execute().await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(categorize_error(&e))
        }
    }
}

/// Logs go to stderr; stdout carries step output only.
fn init_logging(verbose: bool, quiet: bool) {
    let default_filter = if verbose {
        "ciflow=debug,ciflow_runner=debug,warn"
    } else if quiet {
        "warn"
    } else {
        "ciflow=info,ciflow_runner=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

/// Map an error to its exit code.
fn categorize_error(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<RunnerError>() {
        Some(RunnerError::EngineConnect { .. }) => ExitCodes::ENGINE_CONNECT,
        Some(RunnerError::StepExecution { .. }) => ExitCodes::STEP_FAILURE,
        Some(RunnerError::InvalidProject { .. })
        | Some(RunnerError::UnknownTask(_))
        | Some(RunnerError::Config(_)) => ExitCodes::INVALID_ARGS,
        _ => ExitCodes::GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_categorize_error() {
        let connect = anyhow::Error::new(RunnerError::connect("docker", "refused"));
        assert_eq!(categorize_error(&connect), ExitCodes::ENGINE_CONNECT);

        let step = Err::<(), RunnerError>(RunnerError::StepExecution {
            step: "test".into(),
            command: "pytest".into(),
            exit_code: 1,
            stdout: String::new(),
            stderr: String::new(),
        })
        .context("test pipeline failed")
        .unwrap_err();
        assert_eq!(categorize_error(&step), ExitCodes::STEP_FAILURE);

        let invalid = anyhow::Error::new(RunnerError::invalid_project("/missing", "directory does not exist"));
        assert_eq!(categorize_error(&invalid), ExitCodes::INVALID_ARGS);

        let other = anyhow::anyhow!("something else");
        assert_eq!(categorize_error(&other), ExitCodes::GENERAL_ERROR);
    }
}
