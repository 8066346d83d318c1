//! Projects and project identifiers

use std::fmt;

use serde::{Deserialize, Serialize};

use super::command::Command;

/// Identifier of a project within a release plan.
///
/// Maven style identifiers (`group:artifact`) are split on the last `:` by
/// [`ProjectId::group_id`] and [`ProjectId::artifact_id`].
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Create a new project ID
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    /// The full identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Group part of a `group:artifact` identifier (empty if there is none)
    pub fn group_id(&self) -> &str {
        match self.0.rsplit_once(':') {
            Some((group, _)) => group,
            None => "",
        }
    }

    /// Artifact part of a `group:artifact` identifier (the whole id otherwise)
    pub fn artifact_id(&self) -> &str {
        match self.0.rsplit_once(':') {
            Some((_, artifact)) => artifact,
            None => &self.0,
        }
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A releasable unit of the dependency graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier
    pub id: ProjectId,

    /// Depth in the dependency graph (0 = root)
    #[serde(default)]
    pub level: usize,

    /// Whether this project is released as part of its parent
    #[serde(default)]
    pub is_submodule: bool,

    /// Path of the project relative to the repository root
    #[serde(default)]
    pub relative_path: String,

    /// Version before the release
    #[serde(default)]
    pub current_version: String,

    /// Version that will be released
    #[serde(default)]
    pub release_version: String,

    /// Commands in execution order
    #[serde(default)]
    pub commands: Vec<Command>,
}

impl Project {
    /// Create a project without commands
    pub fn new(id: impl Into<ProjectId>, level: usize) -> Self {
        Self {
            id: id.into(),
            level,
            is_submodule: false,
            relative_path: String::new(),
            current_version: String::new(),
            release_version: String::new(),
            commands: Vec::new(),
        }
    }

    /// Mark the project as a submodule
    pub fn as_submodule(mut self) -> Self {
        self.is_submodule = true;
        self
    }

    /// Set the relative path
    pub fn with_relative_path(mut self, path: impl Into<String>) -> Self {
        self.relative_path = path.into();
        self
    }

    /// Set the release version
    pub fn with_release_version(mut self, version: impl Into<String>) -> Self {
        self.release_version = version.into();
        self
    }

    /// Append a command
    pub fn with_command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Commands that are not release commands, with their index
    pub fn non_release_commands(&self) -> impl Iterator<Item = (usize, &Command)> {
        self.commands
            .iter()
            .enumerate()
            .filter(|(_, command)| !command.is_release())
    }

    /// Release commands, with their index
    pub fn release_commands(&self) -> impl Iterator<Item = (usize, &Command)> {
        self.commands
            .iter()
            .enumerate()
            .filter(|(_, command)| command.is_release())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::CommandState;

    #[test]
    fn test_maven_identifier_parts() {
        let id = ProjectId::new("com.example:core");
        assert_eq!(id.group_id(), "com.example");
        assert_eq!(id.artifact_id(), "core");
        assert_eq!(id.to_string(), "com.example:core");
    }

    #[test]
    fn test_plain_identifier_parts() {
        let id = ProjectId::new("core");
        assert_eq!(id.group_id(), "");
        assert_eq!(id.artifact_id(), "core");
    }

    #[test]
    fn test_command_partition_keeps_indices() {
        let project = Project::new("a", 0)
            .with_command(Command::update_dependency("b", CommandState::Ready))
            .with_command(Command::release("1.1-SNAPSHOT", CommandState::Ready))
            .with_command(Command::update_dependency("c", CommandState::Ready));

        let non_release: Vec<usize> = project.non_release_commands().map(|(i, _)| i).collect();
        let release: Vec<usize> = project.release_commands().map(|(i, _)| i).collect();
        assert_eq!(non_release, vec![0, 2]);
        assert_eq!(release, vec![1]);
    }
}
