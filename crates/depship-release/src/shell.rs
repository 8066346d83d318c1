//! Job executor running jobs as local processes
//!
//! Every job has a directory (its base url) holding one numbered directory
//! per build. A build runs the configured runner program detached from
//! depship; when the runner exits, its exit code is written to
//! `<build>/exit_code`. Polling looks for that file, so a build started
//! before an interruption can be observed again later.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::error::ExecutorError;
use crate::job::{JobExecutionData, JobExecutor, JobObserver, JobOutcome, PollSettings};

/// Runs the runner with the job name and records its exit code atomically
const WRAPPER: &str = r#""$1" "$2" > "$DEPSHIP_BUILD_DIR/output.log" 2>&1
echo $? > "$DEPSHIP_BUILD_DIR/exit_code.tmp"
mv "$DEPSHIP_BUILD_DIR/exit_code.tmp" "$DEPSHIP_BUILD_DIR/exit_code""#;

const EXIT_CODE_FILE: &str = "exit_code";

/// [`JobExecutor`] running a local program for every job
#[derive(Debug, Clone)]
pub struct ShellJobExecutor {
    runner: PathBuf,
}

impl ShellJobExecutor {
    /// Executor invoking `runner <job-name>` for every build
    pub fn new(runner: impl Into<PathBuf>) -> Self {
        Self {
            runner: runner.into(),
        }
    }

    fn build_dir(job: &JobExecutionData, build_number: u64) -> PathBuf {
        Path::new(&job.job_base_url).join(build_number.to_string())
    }

    /// Create the directory of the next build of a job
    async fn create_build_dir(job: &JobExecutionData) -> Result<(u64, PathBuf), ExecutorError> {
        let job_dir = Path::new(&job.job_base_url);
        tokio::fs::create_dir_all(job_dir).await?;

        let mut last = 0;
        let mut entries = tokio::fs::read_dir(job_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(number) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            {
                last = last.max(number);
            }
        }

        // Concurrent triggers of one job race for the same number; creating
        // the directory is the claim.
        let mut build_number = last + 1;
        loop {
            let build_dir = Self::build_dir(job, build_number);
            match tokio::fs::create_dir(&build_dir).await {
                Ok(()) => return Ok((build_number, build_dir)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(job = %job.job_name, build_number, "build number taken");
                    build_number += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn spawn(
        &self,
        job: &JobExecutionData,
        build_number: u64,
        build_dir: &Path,
    ) -> Result<(), ExecutorError> {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(WRAPPER)
            .arg("depship-job")
            .arg(&self.runner)
            .arg(&job.job_name)
            .env("DEPSHIP_BUILD_DIR", build_dir)
            .env("DEPSHIP_JOB", &job.job_name)
            .env("DEPSHIP_BUILD_NUMBER", build_number.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        for (name, value) in &job.parameters {
            command.env(env_name(name), value);
        }

        let mut child = command.spawn()?;
        let job_name = job.job_name.clone();
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                warn!(job = %job_name, build_number, "could not wait for job process: {}", e);
            }
        });
        Ok(())
    }

    /// Poll the exit code file of a build until it appears or max wait passes
    async fn wait_for_exit(
        &self,
        job: &JobExecutionData,
        build_number: u64,
        poll: PollSettings,
    ) -> Result<JobOutcome, ExecutorError> {
        let exit_file = Self::build_dir(job, build_number).join(EXIT_CODE_FILE);
        let deadline = Instant::now() + poll.max_wait;

        loop {
            match tokio::fs::read_to_string(&exit_file).await {
                Ok(content) => return parse_exit_code(&job.job_name, &content),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Ok(JobOutcome::Failed {
                    reason: format!(
                        "build {} did not complete within {}s",
                        build_number,
                        poll.max_wait.as_secs()
                    ),
                });
            }
            debug!(job = %job.job_name, build_number, "job still running");
            sleep(poll.interval).await;
        }
    }
}

/// `pathToProject` becomes `DEPSHIP_PATH_TO_PROJECT`
fn env_name(parameter: &str) -> String {
    let mut name = String::from("DEPSHIP_");
    for (i, c) in parameter.chars().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            name.push('_');
        }
        name.push(c.to_ascii_uppercase());
    }
    name
}

fn parse_exit_code(job: &str, content: &str) -> Result<JobOutcome, ExecutorError> {
    let code: i32 = content
        .trim()
        .parse()
        .map_err(|_| ExecutorError::Protocol {
            job: job.to_string(),
            message: format!("invalid exit code '{}'", content.trim()),
        })?;

    if code == 0 {
        Ok(JobOutcome::Succeeded)
    } else {
        Ok(JobOutcome::Failed {
            reason: format!("exited with code {}", code),
        })
    }
}

#[async_trait]
impl JobExecutor for ShellJobExecutor {
    async fn trigger(
        &self,
        job: &JobExecutionData,
        observer: &dyn JobObserver,
        poll: PollSettings,
    ) -> Result<JobOutcome, ExecutorError> {
        let (build_number, build_dir) = Self::create_build_dir(job).await?;
        observer.on_queued(None).await;

        self.spawn(job, build_number, &build_dir)?;
        debug!(job = %job.job_name, build_number, "job started");
        observer.on_started(build_number).await;

        self.wait_for_exit(job, build_number, poll).await
    }

    async fn re_poll(
        &self,
        job: &JobExecutionData,
        build_number: u64,
        poll: PollSettings,
    ) -> Result<JobOutcome, ExecutorError> {
        if !Self::build_dir(job, build_number).is_dir() {
            return Err(ExecutorError::UnknownBuild {
                job: job.job_name.clone(),
                build_number,
            });
        }
        self.wait_for_exit(job, build_number, poll).await
    }
}
