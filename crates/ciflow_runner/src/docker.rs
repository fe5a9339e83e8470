//! Docker Engine API implementation of ContainerEngine.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::service::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{split_image_reference, ContainerSpec};
use crate::engine::{ConnectOptions, ContainerEngine, EngineSession, ExecOutput, ExecRequest};
use crate::error::{RunnerError, RunnerResult};

/// Command that keeps the step container alive between execs.
const KEEP_ALIVE: [&str; 2] = ["sleep", "infinity"];

/// Where the Docker daemon is reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DockerHost {
    /// `DOCKER_HOST` or the platform's local socket.
    #[default]
    LocalDefaults,
    /// Explicit HTTP endpoint.
    Http(String),
}

/// Docker-based container engine.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    host: DockerHost,
    /// Pull images missing locally before starting
    pull_missing: bool,
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerEngine {
    /// Engine talking to the local daemon.
    pub fn new() -> Self {
        Self {
            host: DockerHost::LocalDefaults,
            pull_missing: true,
        }
    }

    /// Engine talking to a custom Docker host.
    pub fn with_host(host: impl Into<String>) -> Self {
        Self {
            host: DockerHost::Http(host.into()),
            pull_missing: true,
        }
    }

    /// Never pull; fail if the image is missing.
    pub fn no_pull(mut self) -> Self {
        self.pull_missing = false;
        self
    }

    fn client(&self) -> Result<Docker, bollard::errors::Error> {
        match &self.host {
            DockerHost::LocalDefaults => Docker::connect_with_local_defaults(),
            DockerHost::Http(host) => {
                Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)
            }
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn is_available(&self) -> bool {
        match self.client() {
            Ok(client) => client.ping().await.is_ok(),
            Err(_) => false,
        }
    }

    async fn connect(&self, _options: &ConnectOptions) -> RunnerResult<Arc<dyn EngineSession>> {
        let client = self
            .client()
            .map_err(|e| RunnerError::connect("docker", e.to_string()))?;

        // Verify connection
        client
            .ping()
            .await
            .map_err(|e| RunnerError::connect("docker", e.to_string()))?;

        let version = client.version().await.ok();
        let session = DockerSession {
            id: format!("docker-{}", &Uuid::new_v4().to_string()[..8]),
            client,
            pull_missing: self.pull_missing,
            containers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };
        info!(
            "Connected to Docker {} (session {})",
            version.and_then(|v| v.version).unwrap_or_default(),
            session.id
        );
        Ok(Arc::new(session))
    }
}

struct DockerSession {
    id: String,
    client: Docker,
    pull_missing: bool,
    containers: Mutex<Vec<String>>,
    closed: AtomicBool,
}

impl DockerSession {
    fn generate_container_name(prefix: Option<&str>) -> String {
        let id = Uuid::new_v4().to_string()[..8].to_string();
        format!("{}-{}", prefix.unwrap_or("ciflow"), id)
    }

    async fn image_exists(&self, reference: &str) -> RunnerResult<bool> {
        match self.client.inspect_image(reference).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, reference: &str) -> RunnerResult<()> {
        let (image, tag) = split_image_reference(reference);
        info!("Pulling image {}:{}", image, tag);

        let options = CreateImageOptions {
            from_image: image,
            tag,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull status: {}", status);
                    }
                }
                Err(e) => return Err(RunnerError::ImagePullFailed(e.to_string())),
            }
        }

        info!("Image {} pulled successfully", reference);
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> RunnerResult<()> {
        self.client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EngineSession for DockerSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start_container(&self, spec: &ContainerSpec) -> RunnerResult<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RunnerError::ExecutionFailed(format!("session {} is closed", self.id)));
        }

        if self.pull_missing && !self.image_exists(&spec.image).await? {
            self.pull_image(&spec.image).await?;
        }

        let mounts: Vec<Mount> = spec
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.source.to_string_lossy().to_string()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let host_config = HostConfig {
            mounts: Some(mounts),
            auto_remove: Some(false),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            entrypoint: Some(KEEP_ALIVE.iter().map(|s| s.to_string()).collect()),
            working_dir: spec.workdir.clone(),
            env: Some(spec.env_pairs()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let container_name = Self::generate_container_name(spec.name_prefix.as_deref());
        debug!("Creating container {} from {}", container_name, spec.image);

        let created = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.as_str(),
                    platform: None,
                }),
                container_config,
            )
            .await?;
        self.containers.lock().push(created.id.clone());

        self.client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;

        Ok(created.id)
    }

    async fn exec(&self, container_id: &str, request: &ExecRequest) -> RunnerResult<ExecOutput> {
        let started_at = Utc::now();

        let exec = self
            .client
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(request.argv.clone()),
                    env: Some(request.env.clone()),
                    working_dir: request.workdir.clone(),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match self.client.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => return Err(RunnerError::ExecutionFailed(e.to_string())),
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(RunnerError::ExecutionFailed(
                    "exec started detached, output unavailable".into(),
                ));
            }
        }

        let inspect = self.client.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.ok_or_else(|| {
            RunnerError::ExecutionFailed(format!("no exit code for exec {}", exec.id))
        })?;

        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

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
        for id in containers {
            debug!("Removing container {}", id);
            if let Err(e) = self.remove(&id).await {
                warn!("Failed to remove container {}: {}", id, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
