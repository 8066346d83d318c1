//! Default configuration values

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "depship.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "depship.yaml";

/// Seconds between two polls of a running job
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Seconds to wait for a job to complete before it counts as failed
pub const DEFAULT_MAX_WAIT_SECS: u64 = 15 * 60;

/// Release plan file used when none is given
pub const DEFAULT_PLAN_FILE: &str = "release.json";

/// Directory the shell executor keeps its builds in
pub const DEFAULT_BUILDS_DIR: &str = ".depship/builds";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".depship.toml",
        ".depship.yaml",
    ]
}
