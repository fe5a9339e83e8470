//! Execution plans: the ordered steps one task invocation runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{ContainerSpec, MountConfig, PipelineSettings, TaskRecipe};
use crate::task::TaskName;

/// Name of the dependency-install step.
pub const INSTALL_STEP: &str = "install";

/// One command in a plan. Its success gates the next step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub argv: Vec<String>,
}

impl Step {
    pub fn new(name: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            name: name.into(),
            argv,
        }
    }

    /// Command rendered for messages, quoting arguments with spaces.
    pub fn command_line(&self) -> String {
        self.argv
            .iter()
            .map(|arg| {
                if arg.is_empty() || arg.contains(char::is_whitespace) {
                    format!("'{}'", arg)
                } else {
                    arg.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.command_line())
    }
}

/// Everything a single pipeline run executes, built fresh per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub task: TaskName,
    pub image: String,
    pub mount: MountConfig,
    pub workdir: String,
    pub env: BTreeMap<String, String>,
    pub steps: Vec<Step>,
}

impl ExecutionPlan {
    /// Build the plan for `task` with the project mounted read-only.
    pub fn build(task: TaskName, settings: &PipelineSettings, project_root: &Path) -> Self {
        let recipe = settings.recipe(task);
        Self::from_recipe(task, &recipe, project_root, &settings.mount_path)
            .with_env(settings.env.clone())
    }

    /// Build a plan from a recipe: install step first, then the task step.
    pub fn from_recipe(
        task: TaskName,
        recipe: &TaskRecipe,
        project_root: &Path,
        mount_path: &str,
    ) -> Self {
        Self {
            task,
            image: recipe.image.clone(),
            mount: MountConfig::new(project_root, mount_path).read_only(),
            workdir: mount_path.to_string(),
            env: BTreeMap::new(),
            steps: vec![
                Step::new(INSTALL_STEP, recipe.install_cmd.clone()),
                Step::new(task.as_str(), recipe.task_cmd.clone()),
            ],
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// The last step, whose stdout is the run's result.
    pub fn final_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Container the engine starts before the first step.
    pub fn container_spec(&self, name_prefix: &str) -> ContainerSpec {
        let mut spec = ContainerSpec::new(&self.image)
            .mount(self.mount.clone())
            .workdir(&self.workdir)
            .name_prefix(name_prefix);
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_plan_layout() {
        let settings = PipelineSettings::default();
        let plan = ExecutionPlan::build(TaskName::Test, &settings, &PathBuf::from("/work/app"));

        assert_eq!(plan.image, "python:3.11-slim");
        assert_eq!(plan.workdir, "/src");
        assert_eq!(plan.mount.source, PathBuf::from("/work/app"));
        assert_eq!(plan.mount.target, "/src");
        assert!(plan.mount.read_only);

        let names: Vec<_> = plan.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["install", "test"]);
        assert_eq!(plan.final_step().unwrap().argv, vec!["pytest"]);
    }

    #[test]
    fn test_container_spec_from_plan() {
        let settings = PipelineSettings::default().env("CI", "true");
        let plan = ExecutionPlan::build(TaskName::Lint, &settings, &PathBuf::from("/work/app"));
        let spec = plan.container_spec("ciflow");

        assert_eq!(spec.image, "python:3.11-slim");
        assert_eq!(spec.workdir.as_deref(), Some("/src"));
        assert_eq!(spec.mounts, vec![plan.mount.clone()]);
        assert_eq!(spec.env.get("CI"), Some(&"true".to_string()));
        assert_eq!(spec.name_prefix.as_deref(), Some("ciflow"));
    }

    #[test]
    fn test_plan_json_env_is_ordered() {
        let settings = PipelineSettings::default()
            .env("ZED", "1")
            .env("ALPHA", "2")
            .env("MIDDLE", "3");
        let plan = ExecutionPlan::build(TaskName::Lint, &settings, &PathBuf::from("/work/app"));

        let json = serde_json::to_string(&plan).unwrap();
        let alpha = json.find("\"ALPHA\"").unwrap();
        let middle = json.find("\"MIDDLE\"").unwrap();
        let zed = json.find("\"ZED\"").unwrap();
        assert!(alpha < middle && middle < zed);
    }

    #[test]
    fn test_command_line_quoting() {
        let step = Step::new(
            "test",
            vec!["pytest".into(), "-k".into(), "not slow".into()],
        );
        assert_eq!(step.command_line(), "pytest -k 'not slow'");
        assert_eq!(step.to_string(), "test: pytest -k 'not slow'");
    }
}
