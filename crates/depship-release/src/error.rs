//! Error types for the release engine
//!
//! Every [`ReleaseError`] is a defect: it aborts the whole release. A job
//! that fails is not an error; it settles its command to
//! [`CommandState::Failed`] and is carried as data.

use thiserror::Error;

use depship_core::{CommandState, ConfigKey, PlanError, ProjectId};

/// Result type alias using ReleaseError
pub type Result<T> = std::result::Result<T, ReleaseError>;

/// Defects that abort a release run
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// The command kind cannot be turned into a job
    #[error("Command {index} of {project} is of unsupported kind '{kind}'")]
    UnsupportedCommand {
        project: ProjectId,
        index: usize,
        kind: String,
    },

    /// A required configuration entry is missing from the release plan
    #[error("{0} is not defined in the release plan configuration")]
    MissingConfig(ConfigKey),

    /// A configuration entry has an unusable value
    #[error("Invalid configuration for {key}: {message}")]
    InvalidConfig { key: ConfigKey, message: String },

    /// A command was marked for re-polling but cannot be re-polled
    #[error("Cannot re-poll command {index} of {project}: {reason}")]
    RePoll {
        project: ProjectId,
        index: usize,
        reason: String,
    },

    /// The state machine does not allow the requested transition
    #[error("Command {index} of {project} cannot change from {from} to {to}")]
    IllegalTransition {
        project: ProjectId,
        index: usize,
        from: CommandState,
        to: CommandState,
    },

    /// Release plan lookup failed
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The job executor failed in an unexpected way
    #[error("Job {job} could not be executed: {source}")]
    Executor {
        job: String,
        #[source]
        source: ExecutorError,
    },
}

/// Unexpected job executor failures
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// A build that should be re-polled does not exist
    #[error("Build {build_number} of job {job} does not exist")]
    UnknownBuild { job: String, build_number: u64 },

    /// The job reported something that cannot be interpreted
    #[error("Unexpected response from job {job}: {message}")]
    Protocol { job: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while saving the release state
#[derive(Debug, Error)]
pub enum PersistError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
