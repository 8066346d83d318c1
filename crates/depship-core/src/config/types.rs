//! Configuration types

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults::{
    DEFAULT_BUILDS_DIR, DEFAULT_MAX_WAIT_SECS, DEFAULT_PLAN_FILE, DEFAULT_POLL_INTERVAL_SECS,
};

/// Main configuration for depship
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Release run configuration
    pub release: ReleaseConfig,

    /// Job executor configuration
    pub executor: ExecutorConfig,
}

/// Release run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Seconds between two polls of a running job
    pub poll_interval_secs: u64,

    /// Seconds to wait for a job before it counts as failed
    pub max_wait_secs: u64,

    /// Release plan file, relative to the configuration directory
    pub plan_file: PathBuf,
}

impl ReleaseConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Maximum wait as a duration
    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_wait_secs: DEFAULT_MAX_WAIT_SECS,
            plan_file: PathBuf::from(DEFAULT_PLAN_FILE),
        }
    }
}

/// Configuration of the shell job executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Program run for every job; receives the job name as first argument
    pub runner: Option<PathBuf>,

    /// Directory holding one numbered directory per build and job
    pub builds_dir: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            runner: None,
            builds_dir: PathBuf::from(DEFAULT_BUILDS_DIR),
        }
    }
}
