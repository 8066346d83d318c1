//! CI jobs: what to run and the executor interface

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

use depship_core::config::defaults::{DEFAULT_MAX_WAIT_SECS, DEFAULT_POLL_INTERVAL_SECS};
use depship_core::{Command, CommandKind, ConfigKey, Project, ReleasePlan};

use crate::error::{ExecutorError, ReleaseError, Result};

/// How a job is observed until it completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Time between two checks of the job
    pub interval: Duration,
    /// Time after which a job that did not complete counts as failed
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_wait: Duration::from_secs(DEFAULT_MAX_WAIT_SECS),
        }
    }
}

/// Terminal outcome of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed { reason: String },
}

/// Callbacks the executor invokes while a triggered job progresses
#[async_trait]
pub trait JobObserver: Send + Sync {
    /// The job was accepted by the CI system; `queue_ref` identifies the queue item
    async fn on_queued(&self, queue_ref: Option<String>);

    /// The job left the queue and runs as build `build_number`
    async fn on_started(&self, build_number: u64);
}

/// Triggers and observes CI jobs.
///
/// A job that runs and fails resolves to [`JobOutcome::Failed`]; an `Err`
/// means the executor itself could not do its work.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Trigger a new build of the job and wait for its outcome
    async fn trigger(
        &self,
        job: &JobExecutionData,
        observer: &dyn JobObserver,
        poll: PollSettings,
    ) -> std::result::Result<JobOutcome, ExecutorError>;

    /// Wait for the outcome of an already started build
    async fn re_poll(
        &self,
        job: &JobExecutionData,
        build_number: u64,
        poll: PollSettings,
    ) -> std::result::Result<JobOutcome, ExecutorError>;
}

/// Everything needed to trigger one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobExecutionData {
    /// Name of the CI job
    pub job_name: String,
    /// Location of the job; builds live below it
    pub job_base_url: String,
    /// Build parameters
    pub parameters: BTreeMap<String, String>,
}

impl JobExecutionData {
    /// Url of build `build_number` of this job
    pub fn build_url(&self, build_number: u64) -> String {
        format!("{}{}/", self.job_base_url, build_number)
    }

    /// Build number of a recorded build url of this job
    pub fn build_number_from_url(&self, build_url: &str) -> Option<u64> {
        let rest = build_url.strip_prefix(&self.job_base_url)?;
        let number = rest.split('/').next()?;
        number.parse().ok()
    }
}

/// Turns commands into [`JobExecutionData`] using the plan configuration
#[derive(Debug, Clone)]
pub struct JobExecutionDataFactory {
    ci_base_url: String,
    update_dependency_job: String,
    remote_regex: Regex,
    remote_job: String,
}

impl JobExecutionDataFactory {
    /// Read the job configuration of the plan.
    ///
    /// Fails if a required key is missing or the remote regex is invalid.
    pub fn new(ci_base_url: impl Into<String>, plan: &ReleasePlan) -> Result<Self> {
        for key in ConfigKey::REQUIRED {
            if plan.config_value(key).is_none() {
                return Err(ReleaseError::MissingConfig(key));
            }
        }
        let value = |key| {
            plan.config_value(key)
                .map(str::to_string)
                .ok_or(ReleaseError::MissingConfig(key))
        };

        let pattern = value(ConfigKey::RemoteRegex)?;
        let remote_regex =
            Regex::new(&format!("^(?:{pattern})$")).map_err(|e| ReleaseError::InvalidConfig {
                key: ConfigKey::RemoteRegex,
                message: e.to_string(),
            })?;

        let mut ci_base_url = ci_base_url.into();
        if !ci_base_url.ends_with('/') {
            ci_base_url.push('/');
        }

        Ok(Self {
            ci_base_url,
            update_dependency_job: value(ConfigKey::UpdateDependencyJob)?,
            remote_regex,
            remote_job: value(ConfigKey::RemoteJob)?,
        })
    }

    /// Job data for command `index` of `project`
    pub fn create(
        &self,
        plan: &ReleasePlan,
        project: &Project,
        index: usize,
        command: &Command,
    ) -> Result<JobExecutionData> {
        let mut parameters = BTreeMap::new();
        let job_name = match &command.kind {
            CommandKind::UpdateDependency { dependency } => {
                let dependency = plan.project(dependency)?;
                parameters.insert("pathToProject".to_string(), project.relative_path.clone());
                parameters.insert("groupId".to_string(), dependency.id.group_id().to_string());
                parameters.insert(
                    "artifactId".to_string(),
                    dependency.id.artifact_id().to_string(),
                );
                parameters.insert("newVersion".to_string(), dependency.release_version.clone());
                self.update_dependency_job.clone()
            }
            CommandKind::Release { next_dev_version } => {
                parameters.insert("releaseVersion".to_string(), project.release_version.clone());
                parameters.insert("nextDevVersion".to_string(), next_dev_version.clone());
                if self.remote_regex.is_match(project.id.as_str()) {
                    parameters.insert("pathToProject".to_string(), project.relative_path.clone());
                    parameters.insert("projectId".to_string(), project.id.to_string());
                    self.remote_job.clone()
                } else {
                    project.id.artifact_id().to_string()
                }
            }
            CommandKind::Unsupported => {
                return Err(ReleaseError::UnsupportedCommand {
                    project: project.id.clone(),
                    index,
                    kind: command.kind.name().to_string(),
                })
            }
        };

        Ok(JobExecutionData {
            job_base_url: format!("{}{}/", self.ci_base_url, job_name),
            job_name,
            parameters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depship_core::CommandState;

    fn plan() -> ReleasePlan {
        ReleasePlan::new("com.example:lib")
            .with_config(ConfigKey::UpdateDependencyJob, "dep-update")
            .with_config(ConfigKey::RemoteRegex, "com\\.example:remote.*")
            .with_config(ConfigKey::RemoteJob, "remote-release")
            .with_project(Project::new("com.example:lib", 0).with_release_version("1.0.0"))
            .with_project(
                Project::new("com.example:app", 1)
                    .with_relative_path("app/")
                    .with_release_version("2.0.0"),
            )
            .with_project(
                Project::new("com.example:remote-app", 1)
                    .with_relative_path("remote/")
                    .with_release_version("3.0.0"),
            )
    }

    #[test]
    fn test_update_dependency_parameters() {
        let plan = plan();
        let factory = JobExecutionDataFactory::new("ci", &plan).unwrap();
        let app = plan.project(&"com.example:app".into()).unwrap();
        let command = Command::update_dependency("com.example:lib", CommandState::Ready);

        let data = factory.create(&plan, app, 0, &command).unwrap();
        assert_eq!(data.job_name, "dep-update");
        assert_eq!(data.job_base_url, "ci/dep-update/");
        assert_eq!(data.parameters["pathToProject"], "app/");
        assert_eq!(data.parameters["groupId"], "com.example");
        assert_eq!(data.parameters["artifactId"], "lib");
        assert_eq!(data.parameters["newVersion"], "1.0.0");
    }

    #[test]
    fn test_local_release_uses_artifact_job() {
        let plan = plan();
        let factory = JobExecutionDataFactory::new("ci/", &plan).unwrap();
        let app = plan.project(&"com.example:app".into()).unwrap();
        let command = Command::release("2.1.0-SNAPSHOT", CommandState::Ready);

        let data = factory.create(&plan, app, 1, &command).unwrap();
        assert_eq!(data.job_name, "app");
        assert_eq!(data.parameters["releaseVersion"], "2.0.0");
        assert_eq!(data.parameters["nextDevVersion"], "2.1.0-SNAPSHOT");
        assert!(!data.parameters.contains_key("projectId"));
    }

    #[test]
    fn test_remote_release_requires_full_match() {
        let plan = plan();
        let factory = JobExecutionDataFactory::new("ci", &plan).unwrap();
        let remote = plan.project(&"com.example:remote-app".into()).unwrap();
        let command = Command::release("3.1.0-SNAPSHOT", CommandState::Ready);

        let data = factory.create(&plan, remote, 0, &command).unwrap();
        assert_eq!(data.job_name, "remote-release");
        assert_eq!(data.parameters["projectId"], "com.example:remote-app");

        let partial = ReleasePlan::new("x")
            .with_config(ConfigKey::UpdateDependencyJob, "dep-update")
            .with_config(ConfigKey::RemoteRegex, "remote")
            .with_config(ConfigKey::RemoteJob, "remote-release");
        let factory = JobExecutionDataFactory::new("ci", &partial).unwrap();
        let data = factory.create(&plan, remote, 0, &command).unwrap();
        assert_eq!(data.job_name, "remote-app");
    }

    #[test]
    fn test_missing_config() {
        let plan = ReleasePlan::new("a").with_config(ConfigKey::UpdateDependencyJob, "dep-update");
        let err = JobExecutionDataFactory::new("ci", &plan).unwrap_err();
        assert!(matches!(err, ReleaseError::MissingConfig(ConfigKey::RemoteRegex)));
    }

    #[test]
    fn test_invalid_regex() {
        let plan = plan().with_config(ConfigKey::RemoteRegex, "(unclosed");
        let err = JobExecutionDataFactory::new("ci", &plan).unwrap_err();
        assert!(matches!(
            err,
            ReleaseError::InvalidConfig {
                key: ConfigKey::RemoteRegex,
                ..
            }
        ));
    }

    #[test]
    fn test_unsupported_command() {
        let plan = plan();
        let factory = JobExecutionDataFactory::new("ci", &plan).unwrap();
        let app = plan.project(&"com.example:app".into()).unwrap();
        let command = Command {
            kind: CommandKind::Unsupported,
            state: CommandState::Ready,
            build_url: None,
        };

        let err = factory.create(&plan, app, 2, &command).unwrap_err();
        assert!(matches!(err, ReleaseError::UnsupportedCommand { index: 2, .. }));
    }

    #[test]
    fn test_build_number_from_url() {
        let data = JobExecutionData {
            job_name: "app".to_string(),
            job_base_url: "ci/app/".to_string(),
            parameters: BTreeMap::new(),
        };

        assert_eq!(data.build_url(12), "ci/app/12/");
        assert_eq!(data.build_number_from_url("ci/app/12/"), Some(12));
        assert_eq!(data.build_number_from_url("ci/app/7/console"), Some(7));
        assert_eq!(data.build_number_from_url("ci/other/7/"), None);
        assert_eq!(data.build_number_from_url("ci/app/lastBuild/"), None);
    }

    #[test]
    fn test_default_poll_settings() {
        let poll = PollSettings::default();
        assert_eq!(poll.interval, Duration::from_secs(5));
        assert_eq!(poll.max_wait, Duration::from_secs(900));
    }
}
