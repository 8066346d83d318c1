//! Command state storage

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use depship_core::{CommandState, PlanError, ProjectId, ReleasePlan, ReleaseState};

use crate::error::{ReleaseError, Result};

/// Current state of one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub state: CommandState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_url: Option<String>,
}

/// Point-in-time copy of all command states
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub release_state: ReleaseState,
    pub commands: BTreeMap<ProjectId, Vec<CommandRecord>>,
}

impl StateSnapshot {
    /// Record of a single command
    pub fn record(&self, project: &ProjectId, index: usize) -> Option<&CommandRecord> {
        self.commands.get(project).and_then(|records| records.get(index))
    }
}

/// Holds the current state of every command of a release run.
///
/// Transitions are validated against [`CommandState::can_transition_to`].
pub trait CommandStateStore: Send + Sync {
    /// Current state of a command
    fn state(&self, project: &ProjectId, index: usize) -> Result<CommandState>;

    /// Recorded build url of a command
    fn build_url(&self, project: &ProjectId, index: usize) -> Result<Option<String>>;

    /// Move a command to `state`, returning the state it had before.
    ///
    /// A `build_url` of `None` keeps the recorded url.
    fn set_state(
        &self,
        project: &ProjectId,
        index: usize,
        state: CommandState,
        build_url: Option<String>,
    ) -> Result<CommandState>;

    /// Overall state of the release
    fn release_state(&self) -> ReleaseState;

    /// Set the overall state of the release
    fn set_release_state(&self, state: ReleaseState);

    /// Copy of all states
    fn snapshot(&self) -> StateSnapshot;
}

/// [`CommandStateStore`] keeping the states in memory
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: Mutex<StateSnapshot>,
}

impl InMemoryStateStore {
    /// Store initialised with the states written in the plan
    pub fn from_plan(plan: &ReleasePlan) -> Self {
        Self::build(plan, |record| record)
    }

    /// Store for continuing an interrupted release.
    ///
    /// Jobs that were running when the release stopped are re-polled if
    /// their build is known and triggered again otherwise.
    pub fn resume_from_plan(plan: &ReleasePlan) -> Self {
        Self::build(plan, |record| CommandRecord {
            state: record.state.resumed(record.build_url.as_deref()),
            build_url: record.build_url,
        })
    }

    /// Trigger failed commands again instead of passing them through
    pub fn with_failed_retried(self) -> Self {
        {
            let mut inner = self.lock();
            for record in inner.commands.values_mut().flatten() {
                record.state = record.state.retried();
            }
        }
        self
    }

    fn build(plan: &ReleasePlan, convert: impl Fn(CommandRecord) -> CommandRecord) -> Self {
        let commands = plan
            .projects
            .values()
            .map(|project| {
                let records = project
                    .commands
                    .iter()
                    .map(|command| {
                        convert(CommandRecord {
                            state: command.state.clone(),
                            build_url: command.build_url.clone(),
                        })
                    })
                    .collect();
                (project.id.clone(), records)
            })
            .collect();

        Self {
            inner: Mutex::new(StateSnapshot {
                release_state: plan.state,
                commands,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StateSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unknown_command(project: &ProjectId, index: usize) -> ReleaseError {
    ReleaseError::Plan(PlanError::UnknownCommand {
        project: project.clone(),
        index,
    })
}

impl CommandStateStore for InMemoryStateStore {
    fn state(&self, project: &ProjectId, index: usize) -> Result<CommandState> {
        self.lock()
            .record(project, index)
            .map(|record| record.state.clone())
            .ok_or_else(|| unknown_command(project, index))
    }

    fn build_url(&self, project: &ProjectId, index: usize) -> Result<Option<String>> {
        self.lock()
            .record(project, index)
            .map(|record| record.build_url.clone())
            .ok_or_else(|| unknown_command(project, index))
    }

    fn set_state(
        &self,
        project: &ProjectId,
        index: usize,
        state: CommandState,
        build_url: Option<String>,
    ) -> Result<CommandState> {
        let mut inner = self.lock();
        let record = inner
            .commands
            .get_mut(project)
            .and_then(|records| records.get_mut(index))
            .ok_or_else(|| unknown_command(project, index))?;

        if !record.state.can_transition_to(&state) {
            return Err(ReleaseError::IllegalTransition {
                project: project.clone(),
                index,
                from: record.state.clone(),
                to: state,
            });
        }

        if build_url.is_some() {
            record.build_url = build_url;
        }
        Ok(std::mem::replace(&mut record.state, state))
    }

    fn release_state(&self) -> ReleaseState {
        self.lock().release_state
    }

    fn set_release_state(&self, state: ReleaseState) {
        self.lock().release_state = state;
    }

    fn snapshot(&self) -> StateSnapshot {
        self.lock().clone()
    }
}
