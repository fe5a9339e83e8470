//! CLI command definitions.
//!
//! `lint` and `test` run the pipeline; `plan` and `engines` are diagnostics.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use ciflow_runner::{PipelineSettings, TaskName};

pub mod engines;
pub mod plan;
pub mod run;

/// ciflow - run lint and test pipelines in ephemeral containers
#[derive(Parser)]
#[command(name = "ciflow")]
#[command(version, about = "ciflow - run lint and test pipelines in ephemeral containers")]
#[command(long_about = r#"
ciflow mounts a Python project read-only into a python:3.11-slim container,
installs requirements-dev.txt and runs one task.

COMMANDS:
  lint     → pip install -r requirements-dev.txt, then ruff check .
  test     → pip install -r requirements-dev.txt, then pytest
  plan     → Print the execution plan as JSON without running it
  engines  → Report which container engines are reachable

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid project or arguments
  3 - Engine connection failure
  4 - Step execution failure
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the linter in a container
    Lint(run::RunArgs),

    /// Run the test suite in a container
    Test(run::RunArgs),

    /// Print the execution plan for a task
    Plan(plan::PlanArgs),

    /// Report container engine availability
    Engines,
}

/// Task selector for commands that take one as an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TaskArg {
    Lint,
    Test,
}

impl From<TaskArg> for TaskName {
    fn from(arg: TaskArg) -> Self {
        match arg {
            TaskArg::Lint => TaskName::Lint,
            TaskArg::Test => TaskName::Test,
        }
    }
}

/// Settings from an optional YAML file plus command-line overrides.
pub fn load_settings(config: Option<&Path>, image: Option<&str>) -> Result<PipelineSettings> {
    let mut settings = match config {
        Some(path) => PipelineSettings::from_file(path)
            .with_context(|| format!("Failed to load settings from {:?}", path))?,
        None => PipelineSettings::default(),
    };

    if let Some(image) = image {
        settings = settings.image(image);
    }
    settings.validate()?;
    Ok(settings)
}

/// Resolve a possibly relative project path against the current directory.
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_lint() {
        let cli = Cli::try_parse_from(["ciflow", "lint", "--path", "app", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Commands::Lint(_)));
    }

    #[test]
    fn test_cli_rejects_unknown_task() {
        assert!(Cli::try_parse_from(["ciflow", "plan", "build"]).is_err());
        assert!(Cli::try_parse_from(["ciflow", "plan", "test"]).is_ok());
    }

    #[test]
    fn test_load_settings_overrides_image() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("ciflow.yaml");
        std::fs::write(&config, "test_cmd: [\"pytest\", \"-x\"]\n").unwrap();

        let settings = load_settings(Some(&config), Some("python:3.12-slim")).unwrap();
        assert_eq!(settings.image, "python:3.12-slim");
        assert_eq!(settings.test_cmd, vec!["pytest", "-x"]);

        assert!(load_settings(Some(&dir.path().join("missing.yaml")), None).is_err());
    }
}
