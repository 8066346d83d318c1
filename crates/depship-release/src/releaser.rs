//! Release orchestration

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, instrument};

use depship_core::{Command, CommandState, Project, ProjectId, ReleasePlan, ReleaseState};

use crate::combinators::{join_all, run_fail_fast, SequenceOutcome};
use crate::error::{ReleaseError, Result};
use crate::job::{
    JobExecutionData, JobExecutionDataFactory, JobExecutor, JobObserver, JobOutcome, PollSettings,
};
use crate::lock::ProjectLocks;
use crate::persist::Persister;
use crate::reporter::{ReleaseEvent, ReleaseReporter, TracingReporter};
use crate::store::CommandStateStore;
use crate::verdict::{evaluate, ProjectResults};

/// Result of a release run
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseSummary {
    /// Overall verdict
    pub state: ReleaseState,
    /// Outcome per project reached during the run
    pub results: BTreeMap<ProjectId, CommandState>,
    /// Projects that did not settle although no job failed
    pub anomalies: Vec<ProjectId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ReleaseSummary {
    pub fn is_success(&self) -> bool {
        self.state == ReleaseState::Succeeded
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Number of projects with the given outcome
    pub fn count(&self, state: &CommandState) -> usize {
        self.results.values().filter(|s| *s == state).count()
    }
}

/// Releases a plan from its root, following the dependency edges.
///
/// Each project runs its non-release commands (and those of its
/// submodules) and then its release commands, one after another, stopping
/// at the first failed command. Once a project is released the waiting
/// states of its dependents are cleared and the dependents are released
/// concurrently.
pub struct Releaser {
    plan: Arc<ReleasePlan>,
    store: Arc<dyn CommandStateStore>,
    executor: Arc<dyn JobExecutor>,
    factory: JobExecutionDataFactory,
    persister: Option<Arc<dyn Persister>>,
    reporter: Arc<dyn ReleaseReporter>,
    poll: PollSettings,
    locks: ProjectLocks,
    results: ProjectResults,
}

impl Releaser {
    /// Create a releaser for `plan`.
    ///
    /// Fails if the plan lacks job configuration, before anything is triggered.
    pub fn new(
        plan: Arc<ReleasePlan>,
        store: Arc<dyn CommandStateStore>,
        executor: Arc<dyn JobExecutor>,
        ci_base_url: &str,
    ) -> Result<Self> {
        let factory = JobExecutionDataFactory::new(ci_base_url, &plan)?;
        Ok(Self {
            plan,
            store,
            executor,
            factory,
            persister: None,
            reporter: Arc::new(TracingReporter),
            poll: PollSettings::default(),
            locks: ProjectLocks::new(),
            results: ProjectResults::new(),
        })
    }

    /// Save the state after every transition
    pub fn with_persister(mut self, persister: Arc<dyn Persister>) -> Self {
        self.persister = Some(persister);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ReleaseReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Run the release and reduce the project outcomes to a verdict
    #[instrument(skip(self), fields(root = %self.plan.root))]
    pub async fn release(&self) -> Result<ReleaseSummary> {
        let started_at = Utc::now();
        let start = Instant::now();
        let root = &self.plan.root;

        self.reporter
            .report(&ReleaseEvent::ReleaseStarted { root: root.clone() });
        self.store.set_release_state(ReleaseState::InProgress);
        self.quiet_save(root).await;

        self.release_project(root).await?;

        let results = self.results.snapshot();
        let verdict = evaluate(&results);
        self.store.set_release_state(verdict.state);
        if let Some(persister) = &self.persister {
            if let Err(e) = persister.save().await {
                self.reporter.report(&ReleaseEvent::FinalSaveFailed {
                    state: verdict.state,
                    error: e.to_string(),
                });
            }
        }

        self.reporter.report(&ReleaseEvent::ReleaseCompleted {
            state: verdict.state,
            duration: start.elapsed(),
            anomalies: verdict.anomalies.clone(),
        });

        Ok(ReleaseSummary {
            state: verdict.state,
            results,
            anomalies: verdict.anomalies,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Release a project and, if it succeeds, everything depending on it
    fn release_project<'a>(&'a self, id: &'a ProjectId) -> BoxFuture<'a, Result<CommandState>> {
        async move {
            let project = self.plan.project(id)?;
            let _guard = self.locks.acquire(&project.id).await;

            let mut preparation = SequenceOutcome::new();
            self.run_non_release_commands(project, &mut preparation)
                .await?;

            let result = if preparation.summary() == CommandState::Succeeded {
                let mut release = SequenceOutcome::new();
                run_fail_fast(&mut release, project.release_commands(), move |(index, command)| {
                    self.dispatch(project, index, command)
                })
                .await?;
                release.summary()
            } else {
                preparation.summary()
            };

            self.results.record(project.id.clone(), result.clone());
            self.reporter.report(&ReleaseEvent::ProjectCompleted {
                project: project.id.clone(),
                result: result.clone(),
            });
            if result != CommandState::Succeeded {
                return Ok(result);
            }

            let pairs = self.plan.collect_dependents_incl_submodules(&project.id);
            self.clear_waiting(&pairs).await?;

            let mut dependents = BTreeSet::new();
            for (_, dependent) in &pairs {
                let dependent = self.plan.project(dependent)?;
                if !dependent.is_submodule {
                    dependents.insert(&dependent.id);
                }
            }
            debug!(project = %project.id, dependents = dependents.len(), "releasing dependents");
            join_all(dependents.into_iter().map(|d| self.release_project(d))).await?;

            Ok(result)
        }
        .boxed()
    }

    /// Run the non-release commands of a project, then those of its submodules
    fn run_non_release_commands<'a>(
        &'a self,
        project: &'a Project,
        outcome: &'a mut SequenceOutcome,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            run_fail_fast(outcome, project.non_release_commands(), move |(index, command)| {
                self.dispatch(project, index, command)
            })
            .await?;

            for submodule in self.plan.submodules_of(&project.id) {
                let submodule = self.plan.project(submodule)?;
                self.run_non_release_commands(submodule, outcome).await?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Remove `upstream` from the waiting sets of the dependent's commands
    async fn clear_waiting(&self, pairs: &BTreeSet<(ProjectId, ProjectId)>) -> Result<()> {
        for (upstream, dependent) in pairs {
            let commands = self.plan.project(dependent)?.commands.len();
            for index in 0..commands {
                let CommandState::Waiting { mut dependencies } = self.store.state(dependent, index)?
                else {
                    continue;
                };
                if !dependencies.remove(upstream) {
                    continue;
                }
                let next = if dependencies.is_empty() {
                    CommandState::Ready
                } else {
                    CommandState::Waiting { dependencies }
                };
                self.transition(dependent, index, next, None).await?;
            }
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        project: &Project,
        index: usize,
        command: &Command,
    ) -> Result<CommandState> {
        let state = self.store.state(&project.id, index)?;
        match state {
            CommandState::Ready | CommandState::ReadyToReTrigger => {
                self.trigger_command(project, index, command).await
            }
            CommandState::RePolling => self.re_poll_command(project, index, command).await,
            CommandState::Queueing | CommandState::InProgress => {
                self.reporter.report(&ReleaseEvent::UnexpectedState {
                    project: project.id.clone(),
                    index,
                    state: state.clone(),
                });
                Ok(state)
            }
            CommandState::Waiting { .. }
            | CommandState::Succeeded
            | CommandState::Failed
            | CommandState::Deactivated
            | CommandState::Disabled => Ok(state),
        }
    }

    async fn trigger_command(
        &self,
        project: &Project,
        index: usize,
        command: &Command,
    ) -> Result<CommandState> {
        let job = self.factory.create(&self.plan, project, index, command)?;
        self.reporter.report(&ReleaseEvent::JobTriggered {
            project: project.id.clone(),
            index,
            job: job.job_name.clone(),
        });

        let observer = CommandObserver {
            releaser: self,
            project: &project.id,
            index,
            job: &job,
            defect: Mutex::new(None),
            raised: Notify::new(),
        };
        // A defect reported from a callback ends the wait for the job
        let triggered = tokio::select! {
            outcome = self.executor.trigger(&job, &observer, self.poll) => {
                outcome.map_err(|source| ReleaseError::Executor {
                    job: job.job_name.clone(),
                    source,
                })
            }
            defect = observer.defect() => Err(defect),
        };
        let outcome = triggered?;
        if let Some(defect) = observer.take_defect() {
            return Err(defect);
        }

        self.finalize_job(&project.id, index, &job, outcome).await
    }

    async fn re_poll_command(
        &self,
        project: &Project,
        index: usize,
        command: &Command,
    ) -> Result<CommandState> {
        let job = self.factory.create(&self.plan, project, index, command)?;
        let re_poll_error = |reason: String| ReleaseError::RePoll {
            project: project.id.clone(),
            index,
            reason,
        };

        let build_url = self
            .store
            .build_url(&project.id, index)?
            .ok_or_else(|| re_poll_error("no build url was recorded".to_string()))?;
        let build_number = job.build_number_from_url(&build_url).ok_or_else(|| {
            re_poll_error(format!(
                "cannot read a build number of job {} from {}",
                job.job_name, build_url
            ))
        })?;

        self.reporter.report(&ReleaseEvent::JobRePolled {
            project: project.id.clone(),
            index,
            job: job.job_name.clone(),
            build_number,
        });
        let outcome = self
            .executor
            .re_poll(&job, build_number, self.poll)
            .await
            .map_err(|source| ReleaseError::Executor {
                job: job.job_name.clone(),
                source,
            })?;

        self.finalize_job(&project.id, index, &job, outcome).await
    }

    async fn finalize_job(
        &self,
        project: &ProjectId,
        index: usize,
        job: &JobExecutionData,
        outcome: JobOutcome,
    ) -> Result<CommandState> {
        let state = match outcome {
            JobOutcome::Succeeded => CommandState::Succeeded,
            JobOutcome::Failed { reason } => {
                self.reporter.report(&ReleaseEvent::JobFailed {
                    project: project.clone(),
                    index,
                    job: job.job_name.clone(),
                    reason,
                });
                CommandState::Failed
            }
        };
        self.transition(project, index, state.clone(), None).await?;
        Ok(state)
    }

    /// Move a command to `state` and save if it changed
    async fn transition(
        &self,
        project: &ProjectId,
        index: usize,
        state: CommandState,
        build_url: Option<String>,
    ) -> Result<()> {
        let previous = self
            .store
            .set_state(project, index, state.clone(), build_url)?;
        if previous == state {
            return Ok(());
        }

        self.reporter.report(&ReleaseEvent::StateChanged {
            project: project.clone(),
            index,
            from: previous,
            to: state,
        });
        self.quiet_save(project).await;
        Ok(())
    }

    /// Save without failing the release
    async fn quiet_save(&self, project: &ProjectId) {
        let Some(persister) = &self.persister else {
            return;
        };
        match persister.save().await {
            Ok(true) => {}
            Ok(false) => self.reporter.report(&ReleaseEvent::SaveWithoutChanges {
                project: project.clone(),
            }),
            Err(e) => self.reporter.report(&ReleaseEvent::SaveFailed {
                project: project.clone(),
                error: e.to_string(),
            }),
        }
    }
}

/// Records the progress of a triggered job in the state store
struct CommandObserver<'a> {
    releaser: &'a Releaser,
    project: &'a ProjectId,
    index: usize,
    job: &'a JobExecutionData,
    defect: Mutex<Option<ReleaseError>>,
    raised: Notify,
}

impl CommandObserver<'_> {
    fn keep_first_defect(&self, result: Result<()>) {
        if let Err(e) = result {
            let mut defect = self.defect.lock().unwrap_or_else(PoisonError::into_inner);
            defect.get_or_insert(e);
            self.raised.notify_one();
        }
    }

    fn take_defect(&self) -> Option<ReleaseError> {
        self.defect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Resolves once a callback failed
    async fn defect(&self) -> ReleaseError {
        loop {
            if let Some(defect) = self.take_defect() {
                return defect;
            }
            self.raised.notified().await;
        }
    }
}

#[async_trait]
impl<'a> JobObserver for CommandObserver<'a> {
    async fn on_queued(&self, queue_ref: Option<String>) {
        if let Some(queue_ref) = &queue_ref {
            debug!(project = %self.project, index = self.index, %queue_ref, "job queued");
        }
        let result = self
            .releaser
            .transition(self.project, self.index, CommandState::Queueing, None)
            .await;
        self.keep_first_defect(result);
    }

    async fn on_started(&self, build_number: u64) {
        let build_url = self.job.build_url(build_number);
        let result = self
            .releaser
            .transition(
                self.project,
                self.index,
                CommandState::InProgress,
                Some(build_url),
            )
            .await;
        self.keep_first_defect(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutorError;
    use crate::persist::JsonFilePersister;
    use crate::reporter::CollectingReporter;
    use crate::store::InMemoryStateStore;
    use depship_core::{CommandKind, ConfigKey};
    use std::collections::HashMap;

    /// Executor answering from a script instead of running jobs
    #[derive(Default)]
    struct ScriptedExecutor {
        outcomes: HashMap<String, JobOutcome>,
        delay: Duration,
        slow: HashMap<String, Duration>,
        skip_observer: bool,
        skip_queued: bool,
        triggered: Mutex<Vec<String>>,
        re_polled: Mutex<Vec<(String, u64)>>,
    }

    impl ScriptedExecutor {
        fn failing(mut self, key: &str) -> Self {
            self.outcomes.insert(
                key.to_string(),
                JobOutcome::Failed {
                    reason: "exit code 1".to_string(),
                },
            );
            self
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// `dep-update:<artifact>` for update jobs, the job name otherwise
        fn key(job: &JobExecutionData) -> String {
            match job.parameters.get("artifactId") {
                Some(artifact) => format!("{}:{}", job.job_name, artifact),
                None => job.job_name.clone(),
            }
        }

        fn outcome(&self, key: &str) -> JobOutcome {
            self.outcomes
                .get(key)
                .cloned()
                .unwrap_or(JobOutcome::Succeeded)
        }

        fn triggered(&self) -> Vec<String> {
            self.triggered.lock().unwrap().clone()
        }

        fn trigger_count(&self, key: &str) -> usize {
            self.triggered().iter().filter(|k| *k == key).count()
        }
    }

    #[async_trait]
    impl JobExecutor for ScriptedExecutor {
        async fn trigger(
            &self,
            job: &JobExecutionData,
            observer: &dyn JobObserver,
            _poll: PollSettings,
        ) -> std::result::Result<JobOutcome, ExecutorError> {
            let key = Self::key(job);
            let build_number = {
                let mut triggered = self.triggered.lock().unwrap();
                triggered.push(key.clone());
                triggered.iter().filter(|k| **k == key).count() as u64
            };
            if !self.skip_observer {
                if !self.skip_queued {
                    observer.on_queued(Some(format!("queue/{build_number}"))).await;
                }
                observer.on_started(build_number).await;
            }
            let delay = self.slow.get(&key).copied().unwrap_or(self.delay);
            tokio::time::sleep(delay).await;
            Ok(self.outcome(&key))
        }

        async fn re_poll(
            &self,
            job: &JobExecutionData,
            build_number: u64,
            _poll: PollSettings,
        ) -> std::result::Result<JobOutcome, ExecutorError> {
            let key = Self::key(job);
            self.re_polled
                .lock()
                .unwrap()
                .push((key.clone(), build_number));
            Ok(self.outcome(&key))
        }
    }

    fn configured(plan: ReleasePlan) -> ReleasePlan {
        plan.with_config(ConfigKey::UpdateDependencyJob, "dep-update")
            .with_config(ConfigKey::RemoteRegex, "remote:.*")
            .with_config(ConfigKey::RemoteJob, "remote-release")
    }

    fn releaser(plan: ReleasePlan, executor: Arc<ScriptedExecutor>) -> (Releaser, Arc<InMemoryStateStore>) {
        let plan = Arc::new(plan);
        let store = Arc::new(InMemoryStateStore::from_plan(&plan));
        let releaser = Releaser::new(plan, store.clone(), executor, "ci").unwrap();
        (releaser, store)
    }

    fn dependent(id: &str, upstreams: &[&str]) -> Project {
        let mut project = Project::new(id, 1);
        for upstream in upstreams {
            project = project.with_command(Command::update_dependency(
                *upstream,
                CommandState::waiting([*upstream]),
            ));
        }
        project.with_command(Command::release(
            "1.1-SNAPSHOT",
            CommandState::waiting(upstreams.iter().copied()),
        ))
    }

    fn root(id: &str) -> Project {
        Project::new(id, 0).with_command(Command::release("1.1-SNAPSHOT", CommandState::Ready))
    }

    /// a <- b, a <- c, b <- d, c <- d
    fn diamond() -> ReleasePlan {
        configured(
            ReleasePlan::new("a")
                .with_project(root("a"))
                .with_project(dependent("b", &["a"]))
                .with_project(dependent("c", &["a"]))
                .with_project(dependent("d", &["b", "c"]))
                .with_dependent("a", "b")
                .with_dependent("a", "c")
                .with_dependent("b", "d")
                .with_dependent("c", "d"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_diamond_releases_shared_project_once() {
        let executor = Arc::new(ScriptedExecutor::default().delayed(Duration::from_secs(5)));
        let (releaser, store) = releaser(diamond(), executor.clone());

        let summary = releaser.release().await.unwrap();

        assert!(summary.is_success());
        assert_eq!(executor.trigger_count("d"), 1);
        assert_eq!(executor.trigger_count("dep-update:b"), 1);
        assert_eq!(executor.trigger_count("dep-update:c"), 1);
        assert_eq!(executor.trigger_count("dep-update:a"), 2);
        assert_eq!(summary.results[&ProjectId::new("d")], CommandState::Succeeded);
        assert_eq!(store.release_state(), ReleaseState::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_diamond_with_uneven_branches() {
        let mut executor = ScriptedExecutor::default().delayed(Duration::from_secs(1));
        executor.slow.insert("c".to_string(), Duration::from_secs(60));
        let executor = Arc::new(executor);
        let reporter = Arc::new(CollectingReporter::default());
        let (releaser, store) = releaser(diamond(), executor.clone());
        let releaser = releaser.with_reporter(reporter.clone());

        let summary = releaser.release().await.unwrap();

        assert!(summary.is_success());
        assert_eq!(executor.trigger_count("d"), 1);
        // d is reached through b first, while c is still running
        let d_results: Vec<CommandState> = reporter
            .events()
            .into_iter()
            .filter_map(|event| match event {
                ReleaseEvent::ProjectCompleted { project, result } if project.as_str() == "d" => {
                    Some(result)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            d_results,
            vec![CommandState::waiting(["c"]), CommandState::Succeeded]
        );
        assert_eq!(summary.results[&ProjectId::new("d")], CommandState::Succeeded);
        assert_eq!(
            store.state(&ProjectId::new("d"), 2).unwrap(),
            CommandState::Succeeded
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_branch_leaves_dependent_waiting() {
        let executor = Arc::new(ScriptedExecutor::default().failing("c"));
        let (releaser, store) = releaser(diamond(), executor.clone());

        let summary = releaser.release().await.unwrap();

        assert_eq!(summary.state, ReleaseState::Failed);
        assert!(summary.anomalies.is_empty());
        assert_eq!(summary.results[&ProjectId::new("c")], CommandState::Failed);
        assert_eq!(executor.trigger_count("d"), 0);
        assert_eq!(
            store.state(&ProjectId::new("d"), 2).unwrap(),
            CommandState::waiting(["c"])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_skips_remaining_commands() {
        let plan = configured(
            ReleasePlan::new("app")
                .with_project(Project::new("lib1", 1))
                .with_project(Project::new("lib2", 1))
                .with_project(Project::new("lib3", 1))
                .with_project(
                    Project::new("app", 0)
                        .with_command(Command::update_dependency("lib1", CommandState::Ready))
                        .with_command(Command::update_dependency("lib2", CommandState::Ready))
                        .with_command(Command::update_dependency("lib3", CommandState::Ready))
                        .with_command(Command::release("2.0-SNAPSHOT", CommandState::Ready)),
                ),
        );
        let executor = Arc::new(ScriptedExecutor::default().failing("dep-update:lib2"));
        let (releaser, store) = releaser(plan, executor.clone());

        let summary = releaser.release().await.unwrap();

        assert_eq!(executor.triggered(), vec!["dep-update:lib1", "dep-update:lib2"]);
        assert_eq!(summary.results[&ProjectId::new("app")], CommandState::Failed);
        assert_eq!(summary.state, ReleaseState::Failed);
        let app = ProjectId::new("app");
        assert_eq!(store.state(&app, 2).unwrap(), CommandState::Ready);
        assert_eq!(store.state(&app, 3).unwrap(), CommandState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partially_cleared_dependent_is_an_anomaly() {
        let plan = configured(
            ReleasePlan::new("a")
                .with_project(root("a"))
                .with_project(Project::new("b", 0))
                .with_project(
                    Project::new("c", 1)
                        .with_command(Command::update_dependency("a", CommandState::waiting(["a"])))
                        .with_command(Command::release(
                            "1.1-SNAPSHOT",
                            CommandState::waiting(["a", "b"]),
                        )),
                )
                .with_dependent("a", "c"),
        );
        let executor = Arc::new(ScriptedExecutor::default());
        let (releaser, store) = releaser(plan, executor.clone());

        let summary = releaser.release().await.unwrap();

        let c = ProjectId::new("c");
        assert_eq!(store.state(&c, 0).unwrap(), CommandState::Succeeded);
        assert_eq!(store.state(&c, 1).unwrap(), CommandState::waiting(["b"]));
        assert_eq!(summary.state, ReleaseState::Failed);
        assert_eq!(summary.anomalies, vec![c]);
        assert_eq!(executor.trigger_count("c"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_re_polling_does_not_trigger() {
        let plan = configured(
            ReleasePlan::new("a").with_project(
                Project::new("a", 0).with_command(
                    Command::release("1.1-SNAPSHOT", CommandState::InProgress)
                        .with_build_url("ci/a/7/"),
                ),
            ),
        );
        let plan = Arc::new(plan);
        let store = Arc::new(InMemoryStateStore::resume_from_plan(&plan));
        let executor = Arc::new(ScriptedExecutor::default());
        let releaser = Releaser::new(plan, store.clone(), executor.clone(), "ci").unwrap();

        let summary = releaser.release().await.unwrap();

        assert!(summary.is_success());
        assert!(executor.triggered().is_empty());
        assert_eq!(
            *executor.re_polled.lock().unwrap(),
            vec![("a".to_string(), 7)]
        );
    }

    #[tokio::test]
    async fn test_re_polling_without_build_url_is_a_defect() {
        let plan = configured(
            ReleasePlan::new("a").with_project(
                Project::new("a", 0)
                    .with_command(Command::release("1.1-SNAPSHOT", CommandState::RePolling)),
            ),
        );
        let executor = Arc::new(ScriptedExecutor::default());
        let (releaser, store) = releaser(plan, executor.clone());

        let err = releaser.release().await.unwrap_err();

        assert!(matches!(err, ReleaseError::RePoll { index: 0, .. }));
        assert_eq!(store.release_state(), ReleaseState::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_releases_of_one_project_trigger_once() {
        let plan = configured(ReleasePlan::new("a").with_project(root("a")));
        let executor = Arc::new(ScriptedExecutor::default().delayed(Duration::from_secs(30)));
        let (releaser, _store) = releaser(plan, executor.clone());
        let a = ProjectId::new("a");

        let (first, second) = tokio::join!(releaser.release_project(&a), releaser.release_project(&a));

        assert_eq!(first.unwrap(), CommandState::Succeeded);
        assert_eq!(second.unwrap(), CommandState::Succeeded);
        assert_eq!(executor.trigger_count("a"), 1);
    }

    #[test]
    fn test_missing_config_aborts_before_triggering() {
        let plan = Arc::new(
            ReleasePlan::new("a")
                .with_project(root("a"))
                .with_config(ConfigKey::UpdateDependencyJob, "dep-update")
                .with_config(ConfigKey::RemoteRegex, "remote:.*"),
        );
        let store = Arc::new(InMemoryStateStore::from_plan(&plan));
        let executor = Arc::new(ScriptedExecutor::default());

        let err = Releaser::new(plan, store, executor.clone(), "ci").err();

        assert!(matches!(
            err,
            Some(ReleaseError::MissingConfig(ConfigKey::RemoteJob))
        ));
        assert!(executor.triggered().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_command_aborts() {
        let plan = configured(
            ReleasePlan::new("a").with_project(Project::new("a", 0).with_command(Command {
                kind: CommandKind::Unsupported,
                state: CommandState::Ready,
                build_url: None,
            })),
        );
        let executor = Arc::new(ScriptedExecutor::default());
        let (releaser, _store) = releaser(plan, executor.clone());

        let err = releaser.release().await.unwrap_err();

        assert!(matches!(err, ReleaseError::UnsupportedCommand { .. }));
        assert!(executor.triggered().is_empty());
    }

    #[tokio::test]
    async fn test_executor_skipping_callbacks_is_a_defect() {
        let plan = configured(ReleasePlan::new("a").with_project(root("a")));
        let executor = Arc::new(ScriptedExecutor {
            skip_observer: true,
            ..Default::default()
        });
        let (releaser, _store) = releaser(plan, executor);

        let err = releaser.release().await.unwrap_err();

        assert!(matches!(err, ReleaseError::IllegalTransition { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_defect_in_callback_stops_waiting_for_the_job() {
        let plan = configured(ReleasePlan::new("a").with_project(root("a")));
        let executor = Arc::new(
            ScriptedExecutor {
                skip_queued: true,
                ..Default::default()
            }
            .delayed(Duration::from_secs(3600)),
        );
        let (releaser, store) = releaser(plan, executor);
        let start = tokio::time::Instant::now();

        let err = releaser.release().await.unwrap_err();

        assert!(matches!(
            err,
            ReleaseError::IllegalTransition {
                from: CommandState::Ready,
                to: CommandState::InProgress,
                ..
            }
        ));
        assert!(start.elapsed() < Duration::from_secs(3600));
        assert_eq!(
            store.state(&ProjectId::new("a"), 0).unwrap(),
            CommandState::Ready
        );
    }

    fn failed_root_plan() -> ReleasePlan {
        configured(
            ReleasePlan::new("a")
                .with_project(
                    Project::new("a", 0)
                        .with_command(Command::release("1.1-SNAPSHOT", CommandState::Failed)),
                )
                .with_project(dependent("b", &["a"]))
                .with_dependent("a", "b"),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_command_passes_through() {
        let executor = Arc::new(ScriptedExecutor::default());
        let (releaser, _store) = releaser(failed_root_plan(), executor.clone());

        let summary = releaser.release().await.unwrap();

        assert_eq!(summary.state, ReleaseState::Failed);
        assert!(executor.triggered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_command_is_retried_on_request() {
        let plan = Arc::new(failed_root_plan());
        let store = Arc::new(InMemoryStateStore::from_plan(&plan).with_failed_retried());
        let executor = Arc::new(ScriptedExecutor::default());
        let releaser = Releaser::new(plan, store.clone(), executor.clone(), "ci").unwrap();

        let summary = releaser.release().await.unwrap();

        assert!(summary.is_success());
        assert_eq!(executor.triggered(), vec!["a", "dep-update:a", "b"]);
        assert_eq!(
            store.state(&ProjectId::new("a"), 0).unwrap(),
            CommandState::Succeeded
        );
        assert_eq!(summary.results[&ProjectId::new("b")], CommandState::Succeeded);
    }

    #[tokio::test]
    async fn test_command_found_running_is_reported() {
        let plan = configured(
            ReleasePlan::new("a").with_project(
                Project::new("a", 0)
                    .with_command(Command::release("1.1-SNAPSHOT", CommandState::Queueing)),
            ),
        );
        let reporter = Arc::new(CollectingReporter::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let (releaser, _store) = releaser(plan, executor.clone());
        let releaser = releaser.with_reporter(reporter.clone());

        let summary = releaser.release().await.unwrap();

        assert!(executor.triggered().is_empty());
        assert_eq!(summary.anomalies, vec![ProjectId::new("a")]);
        assert!(reporter.events().iter().any(|event| matches!(
            event,
            ReleaseEvent::UnexpectedState {
                state: CommandState::Queueing,
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submodules_are_part_of_the_parent() {
        // parent has submodule sub; app depends on sub
        let plan = configured(
            ReleasePlan::new("parent")
                .with_project(Project::new("lib", 2))
                .with_project(
                    Project::new("parent", 0)
                        .with_command(Command::release("1.1-SNAPSHOT", CommandState::Ready)),
                )
                .with_project(
                    Project::new("sub", 0)
                        .as_submodule()
                        .with_command(Command::update_dependency("lib", CommandState::Ready))
                        .with_command(Command::release("1.1-SNAPSHOT", CommandState::Ready)),
                )
                .with_project(dependent("app", &["sub"]))
                .with_submodule("parent", "sub")
                .with_dependent("sub", "app"),
        );
        let executor = Arc::new(ScriptedExecutor::default());
        let (releaser, store) = releaser(plan, executor.clone());

        let summary = releaser.release().await.unwrap();

        assert!(summary.is_success());
        assert_eq!(
            executor.triggered(),
            vec!["dep-update:lib", "parent", "dep-update:sub", "app"]
        );
        assert!(!summary.results.contains_key(&ProjectId::new("sub")));
        assert_eq!(
            store.state(&ProjectId::new("sub"), 1).unwrap(),
            CommandState::Ready
        );
    }

    #[tokio::test]
    async fn test_release_state_is_saved() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("release.json");
        let plan = Arc::new(diamond());
        let store = Arc::new(InMemoryStateStore::from_plan(&plan));
        let persister = Arc::new(JsonFilePersister::new(&path, plan.clone(), store.clone()));
        let reporter = Arc::new(CollectingReporter::default());
        let releaser = Releaser::new(plan, store, Arc::new(ScriptedExecutor::default()), "ci")
            .unwrap()
            .with_persister(persister)
            .with_reporter(reporter.clone());

        releaser.release().await.unwrap();

        let saved = ReleasePlan::load(&path).unwrap();
        assert_eq!(saved.state, ReleaseState::Succeeded);
        let d = &saved.projects[&ProjectId::new("d")];
        assert!(d.commands.iter().all(|c| c.state == CommandState::Succeeded));
        assert_eq!(d.commands[2].build_url.as_deref(), Some("ci/d/1/"));
        assert!(!reporter
            .events()
            .iter()
            .any(|event| matches!(event, ReleaseEvent::SaveFailed { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_wide_fan_out_over_shell_executor() {
        use crate::shell::ShellJobExecutor;
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let runner = temp.path().join("runner.sh");
        std::fs::write(&runner, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&runner, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut plan = ReleasePlan::new("a").with_project(root("a"));
        for i in 0..20 {
            let id = format!("x{}", i);
            plan = plan
                .with_project(dependent(&id, &["a"]))
                .with_dependent("a", id.as_str());
        }
        let plan = Arc::new(configured(plan));
        let store = Arc::new(InMemoryStateStore::from_plan(&plan));
        let builds = temp.path().join("builds");
        let releaser = Releaser::new(
            plan,
            store,
            Arc::new(ShellJobExecutor::new(&runner)),
            &builds.to_string_lossy(),
        )
        .unwrap()
        .with_poll_settings(PollSettings {
            interval: Duration::from_millis(20),
            max_wait: Duration::from_secs(30),
        });

        let summary = releaser.release().await.unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.results.len(), 21);
        let update_builds = std::fs::read_dir(builds.join("dep-update")).unwrap().count();
        assert_eq!(update_builds, 20);
    }
}
