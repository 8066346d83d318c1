//! Release verdict

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use depship_core::{CommandState, ProjectId, ReleaseState};

/// Outcome of every project reached during a release.
///
/// A project released again through a second path of the graph overwrites
/// its earlier result.
#[derive(Debug, Default)]
pub struct ProjectResults {
    results: Mutex<BTreeMap<ProjectId, CommandState>>,
}

impl ProjectResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, project: ProjectId, state: CommandState) {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project, state);
    }

    pub fn get(&self, project: &ProjectId) -> Option<CommandState> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project)
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<ProjectId, CommandState> {
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Overall result of a release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub state: ReleaseState,
    /// Projects that did not settle although no job failed
    pub anomalies: Vec<ProjectId>,
}

/// Reduce the project results to the release verdict.
///
/// The release succeeds if every project succeeded or was excluded. A failed
/// release without any failed project means something stayed unsettled;
/// those projects are listed as anomalies.
pub fn evaluate(results: &BTreeMap<ProjectId, CommandState>) -> Verdict {
    if results.values().all(CommandState::counts_as_success) {
        return Verdict {
            state: ReleaseState::Succeeded,
            anomalies: Vec::new(),
        };
    }

    let anomalies = if results.values().any(|state| *state == CommandState::Failed) {
        Vec::new()
    } else {
        results
            .iter()
            .filter(|(_, state)| !state.counts_as_success())
            .map(|(id, _)| id.clone())
            .collect()
    };

    Verdict {
        state: ReleaseState::Failed,
        anomalies,
    }
}
