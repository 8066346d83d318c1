//! CLI commands

mod release;
mod status;
mod validate;

pub use release::ReleaseCommand;
pub use status::StatusCommand;
pub use validate::ValidateCommand;

use std::path::{Path, PathBuf};

use depship_core::config::Config;

/// Plan file given on the command line, or the configured one
fn plan_path(cwd: &Path, config: &Config, plan: Option<&Path>) -> PathBuf {
    match plan {
        Some(path) => cwd.join(path),
        None => cwd.join(&config.release.plan_file),
    }
}
