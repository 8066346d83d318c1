//! Release progress reporting

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use depship_core::{CommandState, ProjectId, ReleaseState};

/// Events emitted during a release run
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseEvent {
    /// The release starts (or resumes) at the root project
    ReleaseStarted { root: ProjectId },
    /// A command changed its state
    StateChanged {
        project: ProjectId,
        index: usize,
        from: CommandState,
        to: CommandState,
    },
    /// A job is triggered for a command
    JobTriggered {
        project: ProjectId,
        index: usize,
        job: String,
    },
    /// An already started job is observed again
    JobRePolled {
        project: ProjectId,
        index: usize,
        job: String,
        build_number: u64,
    },
    /// A job completed unsuccessfully
    JobFailed {
        project: ProjectId,
        index: usize,
        job: String,
        reason: String,
    },
    /// A command was found in a state it should not have when dispatched
    UnexpectedState {
        project: ProjectId,
        index: usize,
        state: CommandState,
    },
    /// A project's commands all settled
    ProjectCompleted {
        project: ProjectId,
        result: CommandState,
    },
    /// Saving the state after a transition failed
    SaveFailed { project: ProjectId, error: String },
    /// Saving the state after a transition found nothing to save
    SaveWithoutChanges { project: ProjectId },
    /// Saving the final release state failed
    FinalSaveFailed { state: ReleaseState, error: String },
    /// The release reached its verdict
    ReleaseCompleted {
        state: ReleaseState,
        duration: Duration,
        anomalies: Vec<ProjectId>,
    },
}

/// Trait for reporting release progress
pub trait ReleaseReporter: Send + Sync {
    /// Handle a release event
    fn report(&self, event: &ReleaseEvent);
}

/// Simple reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl ReleaseReporter for TracingReporter {
    fn report(&self, event: &ReleaseEvent) {
        match event {
            ReleaseEvent::ReleaseStarted { root } => {
                tracing::info!(%root, "release started");
            }
            ReleaseEvent::StateChanged {
                project,
                index,
                from,
                to,
            } => {
                tracing::debug!(%project, index, %from, %to, "command state changed");
            }
            ReleaseEvent::JobTriggered { project, index, job } => {
                tracing::info!(%project, index, %job, "triggering job");
            }
            ReleaseEvent::JobRePolled {
                project,
                index,
                job,
                build_number,
            } => {
                tracing::info!(%project, index, %job, build_number, "re-polling job");
            }
            ReleaseEvent::JobFailed {
                project,
                index,
                job,
                reason,
            } => {
                tracing::error!(%project, index, %job, %reason, "job failed");
            }
            ReleaseEvent::UnexpectedState {
                project,
                index,
                state,
            } => {
                tracing::warn!(%project, index, %state, "command in unexpected state, not triggering it");
            }
            ReleaseEvent::ProjectCompleted { project, result } => {
                tracing::info!(%project, %result, "project completed");
            }
            ReleaseEvent::SaveFailed { project, error } => {
                tracing::warn!(%project, %error, "could not save release state, next transition retries");
            }
            ReleaseEvent::SaveWithoutChanges { project } => {
                tracing::warn!(%project, "state changed but the saved release state did not");
            }
            ReleaseEvent::FinalSaveFailed { state, error } => {
                tracing::error!(%state, %error, "could not save the final release state");
            }
            ReleaseEvent::ReleaseCompleted {
                state,
                duration,
                anomalies,
            } => {
                if anomalies.is_empty() {
                    tracing::info!(%state, "release completed in {:.1}s", duration.as_secs_f64());
                } else {
                    let ids: Vec<&str> = anomalies.iter().map(ProjectId::as_str).collect();
                    tracing::error!(
                        %state,
                        projects = %ids.join(", "),
                        "release failed without a failed job; these projects did not settle"
                    );
                }
            }
        }
    }
}

/// Reporter that collects events for later inspection (useful for testing)
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<ReleaseEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<ReleaseEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ReleaseReporter for CollectingReporter {
    fn report(&self, event: &ReleaseEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Reporter that forwards every event to a list of reporters
pub struct ReporterRegistry {
    reporters: Vec<Arc<dyn ReleaseReporter>>,
}

impl ReporterRegistry {
    /// Registry with the tracing reporter
    pub fn new() -> Self {
        Self {
            reporters: vec![Arc::new(TracingReporter)],
        }
    }

    /// Registry without reporters
    pub fn empty() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    pub fn register<R: ReleaseReporter + 'static>(&mut self, reporter: R) {
        self.reporters.push(Arc::new(reporter));
    }

    pub fn all(&self) -> &[Arc<dyn ReleaseReporter>] {
        &self.reporters
    }
}

impl Default for ReporterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ReleaseReporter for ReporterRegistry {
    fn report(&self, event: &ReleaseEvent) {
        for reporter in &self.reporters {
            reporter.report(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::default();
        let project = ProjectId::new("com.example:a");

        reporter.report(&ReleaseEvent::JobTriggered {
            project: project.clone(),
            index: 0,
            job: "release a".to_string(),
        });
        reporter.report(&ReleaseEvent::ProjectCompleted {
            project,
            result: CommandState::Succeeded,
        });

        assert_eq!(reporter.events().len(), 2);
    }

    #[test]
    fn test_tracing_reporter() {
        let reporter = TracingReporter;

        // Just verify it doesn't panic
        reporter.report(&ReleaseEvent::ReleaseCompleted {
            state: ReleaseState::Failed,
            duration: Duration::from_secs(3),
            anomalies: vec![ProjectId::new("b")],
        });
        reporter.report(&ReleaseEvent::SaveFailed {
            project: ProjectId::new("a"),
            error: "disk full".to_string(),
        });
    }

    #[test]
    fn test_empty_registry() {
        let registry = ReporterRegistry::empty();
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_registry_forwards_to_all() {
        let collecting = Arc::new(CollectingReporter::default());
        let mut registry = ReporterRegistry::new();
        registry.reporters.push(collecting.clone());

        registry.report(&ReleaseEvent::ReleaseStarted {
            root: ProjectId::new("a"),
        });

        assert_eq!(registry.all().len(), 2);
        assert_eq!(collecting.events().len(), 1);
    }
}
