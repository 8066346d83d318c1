//! Status command

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use console::style;
use tracing::info;

use depship_core::config::load_config_or_default;
use depship_core::{CommandState, Project, ReleasePlan, ReleaseState};
use depship_release::{CommandStateStore, InMemoryStateStore};

use crate::cli::{output, Cli, OutputFormat};

/// Show the state of a release plan
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Release plan file (defaults to the configured plan file)
    #[arg(long)]
    pub plan: Option<PathBuf>,
}

impl StatusCommand {
    /// Execute the status command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!("executing status command");
        let cwd = std::env::current_dir()?;
        let (config, config_path) = load_config_or_default(&cwd)?;

        let plan_path = super::plan_path(&cwd, &config, self.plan.as_deref());
        let plan = ReleasePlan::load(&plan_path)
            .with_context(|| format!("Failed to load release plan {}", plan_path.display()))?;

        let counts = state_counts(&plan);
        let resume = resume_counts(&plan);

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "config_path": config_path.map(|p| p.to_string_lossy().to_string()),
                    "plan_path": plan_path.to_string_lossy(),
                    "root": plan.root,
                    "state": plan.state,
                    "commands": counts,
                    "resume": {
                        "re_poll": resume.re_poll,
                        "re_trigger": resume.re_trigger,
                    },
                    "projects": by_level(&plan).iter().map(|p| serde_json::json!({
                        "id": p.id,
                        "level": p.level,
                        "submodule": p.is_submodule,
                        "commands": p.commands.iter().map(|c| serde_json::json!({
                            "type": c.kind.name(),
                            "state": c.state.to_string(),
                            "build_url": c.build_url,
                        })).collect::<Vec<_>>(),
                    })).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                println!("{}", style("depship Status").bold());
                println!();

                println!("{}", style("Release").underlined());
                println!(
                    "  Plan file:   {}",
                    output::path_style().apply_to(plan_path.display())
                );
                println!("  Root:        {}", style(&plan.root).cyan());
                println!(
                    "  State:       {}",
                    output::release_state_style(plan.state).apply_to(plan.state)
                );
                for (state, count) in &counts {
                    println!("  {:<12} {}", format!("{}:", state), count);
                }
                if plan.state == ReleaseState::InProgress {
                    println!(
                        "  Resuming re-polls {} and re-triggers {} command(s)",
                        resume.re_poll, resume.re_trigger
                    );
                }
                println!();

                println!("{}", style("Projects").underlined());
                for project in by_level(&plan) {
                    let marker = if project.is_submodule { " (submodule)" } else { "" };
                    println!(
                        "  {}{} {}",
                        style(&project.id).bold(),
                        style(marker).dim(),
                        style(format!("level {}", project.level)).dim()
                    );
                    if !cli.quiet {
                        for (index, command) in project.commands.iter().enumerate() {
                            println!(
                                "    #{} {:<18} {}",
                                index,
                                command.kind.name(),
                                output::state_style(&command.state).apply_to(&command.state)
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Projects ordered by graph level, then id
fn by_level(plan: &ReleasePlan) -> Vec<&Project> {
    let mut projects: Vec<&Project> = plan.projects.values().collect();
    projects.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.id.cmp(&b.id)));
    projects
}

/// Number of commands per state name
fn state_counts(plan: &ReleasePlan) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for command in plan.projects.values().flat_map(|p| &p.commands) {
        *counts.entry(command.state.name()).or_default() += 1;
    }
    counts
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ResumeCounts {
    re_poll: usize,
    re_trigger: usize,
}

/// What resuming the plan would do with interrupted commands
fn resume_counts(plan: &ReleasePlan) -> ResumeCounts {
    let resumed = InMemoryStateStore::resume_from_plan(plan).snapshot();
    let mut counts = ResumeCounts::default();
    for (id, records) in &resumed.commands {
        for (index, record) in records.iter().enumerate() {
            let before = plan.projects.get(id).and_then(|p| p.commands.get(index));
            if before.map(|c| &c.state) == Some(&record.state) {
                continue;
            }
            match record.state {
                CommandState::RePolling => counts.re_poll += 1,
                CommandState::ReadyToReTrigger => counts.re_trigger += 1,
                _ => {}
            }
        }
    }
    counts
}
