//! Task names selectable from the outside.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RunnerError;

/// The operation a pipeline run performs after installing dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskName {
    /// Run the linter across the mounted tree.
    Lint,
    /// Run the test runner with default discovery.
    Test,
}

impl TaskName {
    /// Get all task variants.
    pub fn all() -> &'static [TaskName] {
        &[TaskName::Lint, TaskName::Test]
    }

    /// Name used for the task step and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lint => "lint",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskName {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lint" => Ok(Self::Lint),
            "test" => Ok(Self::Test),
            other => Err(RunnerError::UnknownTask(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_names() {
        assert_eq!("lint".parse::<TaskName>().unwrap(), TaskName::Lint);
        assert_eq!(" Test ".parse::<TaskName>().unwrap(), TaskName::Test);
        assert!(matches!(
            "build".parse::<TaskName>(),
            Err(RunnerError::UnknownTask(name)) if name == "build"
        ));
    }

    #[test]
    fn test_display_matches_parse() {
        for task in TaskName::all() {
            assert_eq!(task.to_string().parse::<TaskName>().unwrap(), *task);
        }
    }
}
