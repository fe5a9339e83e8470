//! Container and pipeline configuration types.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};
use crate::task::TaskName;

/// Default base image for both tasks.
pub const DEFAULT_IMAGE: &str = "python:3.11-slim";

/// Fixed in-container path the project is mounted at.
pub const DEFAULT_MOUNT_PATH: &str = "/src";

/// Dependency manifest expected at the project root.
pub const DEFAULT_MANIFEST: &str = "requirements-dev.txt";

/// Container mount configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Host path to mount
    pub source: PathBuf,
    /// Container path to mount to
    pub target: String,
    /// Whether the mount is read-only
    pub read_only: bool,
}

impl MountConfig {
    pub fn new(source: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Mount spec in `-v` form (`host:container[:ro]`).
    pub fn volume_spec(&self) -> String {
        let mut spec = format!("{}:{}", self.source.to_string_lossy(), self.target);
        if self.read_only {
            spec.push_str(":ro");
        }
        spec
    }
}

/// What an engine needs to start the container that executes plan steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Full image reference (`name:tag`)
    pub image: String,
    /// Bind mounts
    pub mounts: Vec<MountConfig>,
    /// Working directory inside the container
    pub workdir: Option<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Container name prefix
    pub name_prefix: Option<String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn mount(mut self, mount: MountConfig) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Environment in `KEY=value` form, sorted for stable command lines.
    pub fn env_pairs(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

/// Split an image reference into repository and tag.
///
/// A colon only counts as a tag separator after the last `/`, so registry
/// ports survive. Digest references and untagged names map to `latest`.
pub fn split_image_reference(reference: &str) -> (&str, &str) {
    if reference.contains('@') {
        return (reference, "latest");
    }
    let name_start = reference.rfind('/').map_or(0, |i| i + 1);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (&reference[..split], &reference[split + 1..])
        }
        None => (reference, "latest"),
    }
}

/// Image, install command and task command for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecipe {
    pub image: String,
    pub install_cmd: Vec<String>,
    pub task_cmd: Vec<String>,
}

/// Pipeline settings shared by both tasks.
///
/// Defaults reproduce the stock pipeline; a YAML file can override any field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Base image reference
    pub image: String,
    /// In-container mount path, also used as working directory
    pub mount_path: String,
    /// Dependency manifest, relative to the project root
    pub manifest: String,
    /// Install command override (defaults to `pip install -r <manifest>`)
    pub install_cmd: Option<Vec<String>>,
    /// Linter command
    pub lint_cmd: Vec<String>,
    /// Test runner command
    pub test_cmd: Vec<String>,
    /// Extra environment for every step
    pub env: BTreeMap<String, String>,
    /// Container name prefix
    pub name_prefix: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
            manifest: DEFAULT_MANIFEST.to_string(),
            install_cmd: None,
            lint_cmd: vec!["ruff".to_string(), "check".to_string(), ".".to_string()],
            test_cmd: vec!["pytest".to_string()],
            env: BTreeMap::new(),
            name_prefix: "ciflow".to_string(),
        }
    }
}

impl PipelineSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a YAML file.
    pub fn from_file(path: &Path) -> RunnerResult<Self> {
        debug!("Reading pipeline settings from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> RunnerResult<Self> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize the settings to YAML.
    pub fn to_yaml(&self) -> RunnerResult<String> {
        serde_yaml::to_string(self).map_err(RunnerError::from)
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn mount_path(mut self, path: impl Into<String>) -> Self {
        self.mount_path = path.into();
        self
    }

    pub fn lint_cmd(mut self, cmd: Vec<String>) -> Self {
        self.lint_cmd = cmd;
        self
    }

    pub fn test_cmd(mut self, cmd: Vec<String>) -> Self {
        self.test_cmd = cmd;
        self
    }

    pub fn install_cmd(mut self, cmd: Vec<String>) -> Self {
        self.install_cmd = Some(cmd);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Check that every command and path is usable.
    pub fn validate(&self) -> RunnerResult<()> {
        if self.image.trim().is_empty() {
            return Err(RunnerError::Config("image must not be empty".into()));
        }
        if !self.mount_path.starts_with('/') {
            return Err(RunnerError::Config(format!(
                "mount_path must be absolute, got '{}'",
                self.mount_path
            )));
        }
        if self.manifest.trim().is_empty() {
            return Err(RunnerError::Config("manifest must not be empty".into()));
        }
        for (name, cmd) in [
            ("install_cmd", self.install_command()),
            ("lint_cmd", self.lint_cmd.clone()),
            ("test_cmd", self.test_cmd.clone()),
        ] {
            if cmd.is_empty() || cmd[0].trim().is_empty() {
                return Err(RunnerError::Config(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }

    /// The dependency-install command.
    pub fn install_command(&self) -> Vec<String> {
        self.install_cmd.clone().unwrap_or_else(|| {
            vec![
                "pip".to_string(),
                "install".to_string(),
                "-r".to_string(),
                self.manifest.clone(),
            ]
        })
    }

    /// Recipe for a task.
    pub fn recipe(&self, task: TaskName) -> TaskRecipe {
        let task_cmd = match task {
            TaskName::Lint => self.lint_cmd.clone(),
            TaskName::Test => self.test_cmd.clone(),
        };
        TaskRecipe {
            image: self.image.clone(),
            install_cmd: self.install_command(),
            task_cmd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_config() {
        let mount = MountConfig::new(PathBuf::from("/host/path"), "/src").read_only();

        assert!(mount.read_only);
        assert_eq!(mount.target, "/src");
        assert_eq!(mount.volume_spec(), "/host/path:/src:ro");
    }

    #[test]
    fn test_container_spec_builder() {
        let spec = ContainerSpec::new("python:3.11-slim")
            .workdir("/src")
            .env("PYTHONUNBUFFERED", "1")
            .env("CI", "true")
            .mount(MountConfig::new("/project", "/src").read_only());

        assert_eq!(spec.workdir.as_deref(), Some("/src"));
        assert_eq!(spec.env_pairs(), vec!["CI=true", "PYTHONUNBUFFERED=1"]);
        assert_eq!(spec.mounts.len(), 1);
    }

    #[test]
    fn test_split_image_reference() {
        assert_eq!(split_image_reference("python:3.11-slim"), ("python", "3.11-slim"));
        assert_eq!(split_image_reference("python"), ("python", "latest"));
        assert_eq!(
            split_image_reference("localhost:5000/tools/python:3.11"),
            ("localhost:5000/tools/python", "3.11")
        );
        assert_eq!(
            split_image_reference("localhost:5000/python"),
            ("localhost:5000/python", "latest")
        );
    }

    #[test]
    fn test_default_recipes() {
        let settings = PipelineSettings::default();

        let lint = settings.recipe(TaskName::Lint);
        assert_eq!(lint.image, "python:3.11-slim");
        assert_eq!(lint.install_cmd, vec!["pip", "install", "-r", "requirements-dev.txt"]);
        assert_eq!(lint.task_cmd, vec!["ruff", "check", "."]);

        let test = settings.recipe(TaskName::Test);
        assert_eq!(test.task_cmd, vec!["pytest"]);
        assert_eq!(test.install_cmd, lint.install_cmd);
    }

    #[test]
    fn test_settings_from_yaml_partial() {
        let yaml = r#"
image: python:3.12-slim
test_cmd: ["pytest", "-q"]
env:
  PYTHONUNBUFFERED: "1"
"#;
        let settings = PipelineSettings::from_yaml(yaml).unwrap();

        assert_eq!(settings.image, "python:3.12-slim");
        assert_eq!(settings.test_cmd, vec!["pytest", "-q"]);
        assert_eq!(settings.mount_path, "/src");
        assert_eq!(settings.lint_cmd, vec!["ruff", "check", "."]);
        assert_eq!(settings.env.get("PYTHONUNBUFFERED"), Some(&"1".to_string()));
    }

    #[test]
    fn test_settings_manifest_drives_install() {
        let settings = PipelineSettings::from_yaml("manifest: requirements.txt").unwrap();
        assert_eq!(
            settings.install_command(),
            vec!["pip", "install", "-r", "requirements.txt"]
        );
    }

    #[test]
    fn test_settings_validation() {
        assert!(PipelineSettings::from_yaml("mount_path: src").is_err());
        assert!(PipelineSettings::from_yaml("lint_cmd: []").is_err());
        assert!(PipelineSettings::from_yaml("image: ''").is_err());
        assert!(PipelineSettings::default().validate().is_ok());
    }
}
