//! Plan command - print the execution plan without running it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use ciflow_runner::{CliEngine, CliEngineOptions, PipelineRunner, TaskName};

use super::{load_settings, resolve_path, TaskArg};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Task to plan
    #[arg(value_enum)]
    task: TaskArg,

    /// Path to the project root
    #[arg(short, long, default_value = ".")]
    path: PathBuf,

    /// Pipeline settings file (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the base image
    #[arg(long)]
    image: Option<String>,
}

pub fn execute(args: PlanArgs) -> Result<()> {
    let project = resolve_path(&args.path)?;
    let settings = load_settings(args.config.as_deref(), args.image.as_deref())?;

    // Planning never contacts the engine
    let runner = PipelineRunner::new(Arc::new(CliEngine::new(CliEngineOptions::new().dry_run())))
        .with_settings(settings);
    let plan = runner.plan(TaskName::from(args.task), &project)?;

    let json = serde_json::to_string_pretty(&plan).context("Failed to serialize plan")?;
    println!("{}", json);
    Ok(())
}
