//! Release command

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use console::style;
use tracing::info;

use depship_core::config::{load_config_or_default, validate_config};
use depship_core::{CommandState, ConfigError, ReleasePlan, ReleaseState};
use depship_release::{
    CommandStateStore, InMemoryStateStore, JsonFilePersister, PollSettings, ReleaseEvent,
    ReleaseReporter, ReleaseSummary, Releaser, ReporterRegistry, ShellJobExecutor,
};

use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Release the projects of a release plan
#[derive(Debug, Args)]
pub struct ReleaseCommand {
    /// Release plan file (defaults to the configured plan file)
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Seconds between two polls of a running job
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Seconds to wait for a job before it counts as failed
    #[arg(long)]
    pub max_wait: Option<u64>,

    /// Continue an interrupted release: running jobs are observed again
    /// instead of being triggered a second time
    #[arg(long)]
    pub resume: bool,

    /// Trigger the jobs of failed commands again
    #[arg(long)]
    pub retry_failed: bool,
}

impl ReleaseCommand {
    /// Execute the release command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(
            resume = self.resume,
            retry_failed = self.retry_failed,
            "executing release command"
        );
        let cwd = std::env::current_dir()?;
        let (mut config, _) = load_config_or_default(&cwd)?;

        if let Some(secs) = self.poll_interval {
            config.release.poll_interval_secs = secs;
        }
        if let Some(secs) = self.max_wait {
            config.release.max_wait_secs = secs;
        }
        validate_config(&config)?;

        let runner = config
            .executor
            .runner
            .clone()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "executor.runner".to_string(),
                message: "a runner program is required to release".to_string(),
            })?;

        let plan_path = super::plan_path(&cwd, &config, self.plan.as_deref());
        let plan = ReleasePlan::load(&plan_path)
            .with_context(|| format!("Failed to load release plan {}", plan_path.display()))?;

        if plan.state == ReleaseState::InProgress && !self.resume && !cli.quiet {
            output::warning(
                "The release plan was interrupted during a release; use --resume to observe running jobs again",
            );
        }
        if plan.state == ReleaseState::Failed && !self.retry_failed && !cli.quiet {
            output::warning(
                "The release plan has failed jobs; use --retry-failed to trigger them again",
            );
        }

        let plan = Arc::new(plan);
        let mut store = if self.resume {
            InMemoryStateStore::resume_from_plan(&plan)
        } else {
            InMemoryStateStore::from_plan(&plan)
        };
        if self.retry_failed {
            store = store.with_failed_retried();
        }
        let store: Arc<dyn CommandStateStore> = Arc::new(store);
        let persister = Arc::new(JsonFilePersister::new(
            &plan_path,
            plan.clone(),
            store.clone(),
        ));

        let mut reporters = ReporterRegistry::new();
        if !cli.quiet && cli.format == OutputFormat::Text {
            reporters.register(ConsoleReporter::new(cli.verbose));
        }

        let builds_dir = cwd.join(&config.executor.builds_dir);
        let releaser = Releaser::new(
            plan.clone(),
            store,
            Arc::new(ShellJobExecutor::new(runner)),
            &builds_dir.to_string_lossy(),
        )?
        .with_persister(persister)
        .with_reporter(Arc::new(reporters))
        .with_poll_settings(PollSettings {
            interval: config.release.poll_interval(),
            max_wait: config.release.max_wait(),
        });

        if !cli.quiet && cli.format == OutputFormat::Text {
            output::info(&format!(
                "Releasing {} projects starting with {}",
                plan.projects.len(),
                style(&plan.root).cyan()
            ));
            println!();
        }

        let summary = releaser.release().await?;

        match cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    print_summary(&summary);
                }
            }
        }

        if !summary.is_success() {
            std::process::exit(exit_codes::RELEASE_FAILED);
        }

        Ok(())
    }
}

fn print_summary(summary: &ReleaseSummary) {
    println!();
    println!("{}", output::header("Release Summary"));
    println!(
        "{}",
        output::key_value(
            "State",
            &output::release_state_style(summary.state)
                .apply_to(summary.state)
                .to_string()
        )
    );
    println!(
        "{}",
        output::key_value("Released", &summary.count(&CommandState::Succeeded).to_string())
    );
    println!(
        "{}",
        output::key_value("Failed", &summary.count(&CommandState::Failed).to_string())
    );
    println!(
        "{}",
        output::key_value("Duration", &format!("{:.1}s", summary.duration().as_secs_f64()))
    );

    if !summary.anomalies.is_empty() {
        println!();
        output::warning("These projects did not settle although no job failed:");
        for project in &summary.anomalies {
            let state = summary
                .results
                .get(project)
                .map(|s| s.to_string())
                .unwrap_or_default();
            println!("    {} ({})", style(project).yellow(), state);
        }
    }

    println!();
    if summary.is_success() {
        output::success("Release completed");
    } else {
        output::error("Release failed");
    }
}

/// Console reporter with live progress
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ReleaseReporter for ConsoleReporter {
    fn report(&self, event: &ReleaseEvent) {
        match event {
            ReleaseEvent::JobTriggered {
                project,
                index,
                job,
            } => {
                println!(
                    "  {} {} {}",
                    style("▸").dim(),
                    style(project).bold(),
                    style(format!("#{} {}", index, job)).dim()
                );
            }
            ReleaseEvent::JobRePolled {
                project,
                job,
                build_number,
                ..
            } => {
                println!(
                    "  {} {} {}",
                    style("↻").cyan(),
                    style(project).bold(),
                    style(format!("{} build {}", job, build_number)).dim()
                );
            }
            ReleaseEvent::StateChanged {
                project,
                index,
                from,
                to,
            } => {
                if self.verbose {
                    println!(
                        "    {} #{} {} → {}",
                        style(project).dim(),
                        index,
                        output::state_style(from).apply_to(from),
                        output::state_style(to).apply_to(to)
                    );
                }
            }
            ReleaseEvent::JobFailed {
                project,
                job,
                reason,
                ..
            } => {
                println!(
                    "  {} {} {}: {}",
                    style("✗").red(),
                    style(project).red(),
                    job,
                    reason
                );
            }
            ReleaseEvent::UnexpectedState {
                project,
                index,
                state,
            } => {
                output::warning(&format!(
                    "{} #{} is {} and was not triggered",
                    project, index, state
                ));
            }
            ReleaseEvent::ProjectCompleted { project, result } => match result {
                CommandState::Succeeded => {
                    println!("  {} {}", style("✓").green(), style(project).green());
                }
                CommandState::Failed => {
                    println!("  {} {}", style("✗").red(), style(project).red());
                }
                other => {
                    if self.verbose {
                        println!(
                            "  {} {} {}",
                            style("…").dim(),
                            project,
                            output::state_style(other).apply_to(other)
                        );
                    }
                }
            },
            ReleaseEvent::SaveFailed { project, error } => {
                output::warning(&format!(
                    "Could not save the release state after {}: {}",
                    project, error
                ));
            }
            ReleaseEvent::FinalSaveFailed { error, .. } => {
                output::warning(&format!("Could not save the final release state: {}", error));
            }
            ReleaseEvent::ReleaseStarted { .. }
            | ReleaseEvent::SaveWithoutChanges { .. }
            | ReleaseEvent::ReleaseCompleted { .. } => {}
        }
    }
}
