//! Validate command

use std::path::PathBuf;

use clap::Args;
use console::style;
use tracing::info;

use depship_core::config::{load_config_from_dir, validation::validate_config, Config};
use depship_core::{CommandKind, ReleasePlan};
use depship_release::JobExecutionDataFactory;

use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Validate configuration and release plan
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Release plan file (defaults to the configured plan file)
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Only validate configuration file
    #[arg(long)]
    pub config_only: bool,

    /// Strict mode - treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

impl ValidateCommand {
    /// Execute the validate command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(
            config_only = self.config_only,
            strict = self.strict,
            "executing validate command"
        );
        let cwd = std::env::current_dir()?;

        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        // Validate configuration
        let (config, config_path) = match load_config_from_dir(&cwd) {
            Ok((c, p)) => (c, Some(p)),
            Err(e) => {
                warnings.push(format!("Configuration: {}, using defaults", e));
                (Config::default(), None)
            }
        };
        if let Err(e) = validate_config(&config) {
            errors.push(format!("Configuration validation: {}", e));
        }
        if config.executor.runner.is_none() {
            warnings.push("No executor.runner configured; releases cannot run".to_string());
        }

        let plan_path = super::plan_path(&cwd, &config, self.plan.as_deref());
        if !self.config_only {
            match ReleasePlan::load(&plan_path) {
                Ok(plan) => check_plan(&plan, &mut errors, &mut warnings),
                Err(e) => errors.push(format!("Release plan: {}", e)),
            }
        }

        // If strict, promote warnings to errors
        if self.strict {
            errors.append(&mut warnings);
        }

        let passed = errors.is_empty();

        match cli.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "valid": passed,
                    "config_path": config_path.map(|p| p.to_string_lossy().to_string()),
                    "plan_path": (!self.config_only).then(|| plan_path.to_string_lossy().to_string()),
                    "errors": errors,
                    "warnings": warnings
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!("{}", style("Validation Results").bold());
                    println!();

                    if let Some(path) = config_path {
                        println!("Config: {}", style(path.display()).cyan());
                    }
                    if !self.config_only {
                        println!("Plan:   {}", style(plan_path.display()).cyan());
                    }
                    println!();

                    if !errors.is_empty() {
                        println!("{}", style("Errors:").red().bold());
                        for error in &errors {
                            println!("  {} {}", style("✗").red(), error);
                        }
                        println!();
                    }

                    if !warnings.is_empty() {
                        println!("{}", style("Warnings:").yellow().bold());
                        for warning in &warnings {
                            println!("  {} {}", style("!").yellow(), warning);
                        }
                        println!();
                    }

                    if passed {
                        if warnings.is_empty() {
                            println!("{}", style("✓ All checks passed").green().bold());
                        } else {
                            println!(
                                "{} with {} warning(s)",
                                style("✓ Validation passed").green().bold(),
                                warnings.len()
                            );
                        }
                    } else {
                        println!(
                            "{} with {} error(s)",
                            style("✗ Validation failed").red().bold(),
                            errors.len()
                        );
                    }
                }
            }
        }

        if !passed {
            std::process::exit(exit_codes::CONFIG_ERROR);
        }

        Ok(())
    }
}

/// Checks a loaded plan beyond its graph structure
fn check_plan(plan: &ReleasePlan, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    if let Err(e) = JobExecutionDataFactory::new("", plan) {
        errors.push(format!("Release plan configuration: {}", e));
    }

    for project in plan.projects.values() {
        for (index, command) in project.commands.iter().enumerate() {
            if command.kind == CommandKind::Unsupported {
                errors.push(format!(
                    "Command {} of {} has a kind this version cannot run",
                    index, project.id
                ));
            }
        }
        if project.commands.is_empty() && !project.is_submodule {
            warnings.push(format!("Project {} has no commands", project.id));
        }
    }
}
