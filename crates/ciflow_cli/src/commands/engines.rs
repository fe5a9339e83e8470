//! Engines command - report which container engines are reachable.

use anyhow::Result;

use ciflow_runner::{CliEngine, CliEngineOptions, ContainerEngine, DockerEngine};

pub async fn execute() -> Result<()> {
    let docker = DockerEngine::new();
    let docker_status = if docker.is_available().await {
        "available".to_string()
    } else {
        "unreachable".to_string()
    };

    let cli = CliEngine::new(CliEngineOptions::new());
    let cli_status = match cli.version().await {
        Ok(version) => format!("available ({})", version),
        Err(e) => format!("unavailable: {}", e),
    };

    println!("Engines:");
    println!("  docker  {}", docker_status);
    println!("  cli     {}", cli_status);
    Ok(())
}
