//! Error types for depship-core

use std::path::PathBuf;
use thiserror::Error;

use crate::plan::ProjectId;

/// Result type alias using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Main error type for plan and configuration handling
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Release plan errors
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Release plan errors
#[derive(Debug, Error)]
pub enum PlanError {
    /// Root project is not part of the plan
    #[error("Root project {0} is not part of the release plan")]
    UnknownRoot(ProjectId),

    /// A project was referenced but is not part of the plan
    #[error("Project {id} referenced by {referenced_by} is not part of the release plan")]
    UnknownProject { id: ProjectId, referenced_by: String },

    /// A project is stored under a different key than its own id
    #[error("Project {actual} is stored under the id {key}")]
    MismatchedId { key: ProjectId, actual: ProjectId },

    /// Command index outside of the project's command list
    #[error("Project {project} has no command with index {index}")]
    UnknownCommand { project: ProjectId, index: usize },

    /// The dependents graph contains a cycle
    #[error("Cyclic dependency detected among projects: {0}")]
    CyclicDependency(String),
}
