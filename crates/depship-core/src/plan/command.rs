//! Commands and the command state machine

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::project::ProjectId;

/// A discrete action belonging to a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// What the command does
    #[serde(flatten)]
    pub kind: CommandKind,

    /// State the command had when the plan was written
    pub state: CommandState,

    /// Build of the job that executed this command, if one was started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_url: Option<String>,
}

impl Command {
    /// Create a command that updates the version of `dependency`
    pub fn update_dependency(dependency: impl Into<ProjectId>, state: CommandState) -> Self {
        Self {
            kind: CommandKind::UpdateDependency {
                dependency: dependency.into(),
            },
            state,
            build_url: None,
        }
    }

    /// Create a release command
    pub fn release(next_dev_version: impl Into<String>, state: CommandState) -> Self {
        Self {
            kind: CommandKind::Release {
                next_dev_version: next_dev_version.into(),
            },
            state,
            build_url: None,
        }
    }

    /// Set the recorded build url
    pub fn with_build_url(mut self, url: impl Into<String>) -> Self {
        self.build_url = Some(url.into());
        self
    }

    /// Whether this command performs the actual release of its project
    pub fn is_release(&self) -> bool {
        matches!(self.kind, CommandKind::Release { .. })
    }
}

/// The kinds of commands the orchestrator knows how to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandKind {
    /// Substitute the release version of `dependency` in the project
    UpdateDependency { dependency: ProjectId },

    /// Release the project
    Release { next_dev_version: String },

    /// A command kind this build does not know; running it is a defect
    #[serde(other)]
    Unsupported,
}

impl CommandKind {
    /// Short name used in logs and job names
    pub fn name(&self) -> &'static str {
        match self {
            Self::UpdateDependency { .. } => "update-dependency",
            Self::Release { .. } => "release",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Execution state of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CommandState {
    /// Blocked until every listed upstream project has been released
    Waiting { dependencies: BTreeSet<ProjectId> },
    /// Can be triggered
    Ready,
    /// Failed before and was marked to be triggered again
    ReadyToReTrigger,
    /// The job was handed to the CI system and waits for an executor
    Queueing,
    /// The job is running
    InProgress,
    /// A previously started job has to be observed again (after an interruption)
    RePolling,
    /// The job completed successfully
    Succeeded,
    /// The job failed
    Failed,
    /// Temporarily excluded from the release by the operator
    Deactivated,
    /// Permanently excluded from the release
    Disabled,
}

impl CommandState {
    /// Create a waiting state on the given upstream projects
    pub fn waiting<I, P>(dependencies: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProjectId>,
    {
        Self::Waiting {
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        }
    }

    /// Snake-case name of the state
    pub fn name(&self) -> &'static str {
        match self {
            Self::Waiting { .. } => "waiting",
            Self::Ready => "ready",
            Self::ReadyToReTrigger => "ready_to_re_trigger",
            Self::Queueing => "queueing",
            Self::InProgress => "in_progress",
            Self::RePolling => "re_polling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Deactivated => "deactivated",
            Self::Disabled => "disabled",
        }
    }

    /// Whether no further work happens for this command during a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Deactivated | Self::Disabled
        )
    }

    /// Whether this outcome lets the release as a whole succeed
    pub fn counts_as_success(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Deactivated | Self::Disabled)
    }

    /// Whether the command may move from this state to `next`.
    ///
    /// Setting the current state again is always allowed.
    pub fn can_transition_to(&self, next: &CommandState) -> bool {
        use CommandState::*;

        if self == next {
            return true;
        }
        match (self, next) {
            (Waiting { dependencies: current }, Waiting { dependencies: narrowed }) => {
                narrowed.is_subset(current)
            }
            (Waiting { .. }, Ready | Deactivated | Disabled) => true,
            (Ready | ReadyToReTrigger, Queueing | Deactivated | Disabled) => true,
            (Queueing, InProgress | Succeeded | Failed) => true,
            (InProgress, Succeeded | Failed | RePolling) => true,
            (RePolling, Succeeded | Failed) => true,
            (Failed, ReadyToReTrigger | RePolling) => true,
            (Deactivated, Ready | Waiting { .. }) => true,
            _ => false,
        }
    }

    /// State to resume with after the release was interrupted.
    ///
    /// A job that was running is observed again if its build is known;
    /// jobs that never reported a build are triggered again.
    pub fn resumed(&self, build_url: Option<&str>) -> CommandState {
        match self {
            Self::InProgress if build_url.is_some() => Self::RePolling,
            Self::InProgress | Self::Queueing => Self::ReadyToReTrigger,
            other => other.clone(),
        }
    }

    /// State for running a failed job once more; other states are kept
    pub fn retried(&self) -> CommandState {
        match self {
            Self::Failed => Self::ReadyToReTrigger,
            other => other.clone(),
        }
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting { dependencies } => {
                let deps: Vec<&str> = dependencies.iter().map(ProjectId::as_str).collect();
                write!(f, "waiting on [{}]", deps.join(", "))
            }
            other => f.write_str(other.name()),
        }
    }
}
