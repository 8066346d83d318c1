//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::Config;

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_release(config)?;
    validate_executor(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_release(config: &Config) -> Result<()> {
    if config.release.poll_interval_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "release.poll_interval_secs".to_string(),
            message: "must be greater than zero".to_string(),
        }
        .into());
    }

    if config.release.max_wait_secs < config.release.poll_interval_secs {
        return Err(ConfigError::InvalidValue {
            field: "release.max_wait_secs".to_string(),
            message: "must not be shorter than the poll interval".to_string(),
        }
        .into());
    }

    if config.release.plan_file.as_os_str().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "release.plan_file".to_string(),
            message: "plan file cannot be empty".to_string(),
        }
        .into());
    }

    Ok(())
}

fn validate_executor(config: &Config) -> Result<()> {
    if config.executor.builds_dir.as_os_str().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "executor.builds_dir".to_string(),
            message: "builds directory cannot be empty".to_string(),
        }
        .into());
    }

    if let Some(runner) = &config.executor.runner {
        if runner.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "executor.runner".to_string(),
                message: "runner cannot be empty when set".to_string(),
            }
            .into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = Config::default();
        config.release.poll_interval_secs = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_max_wait_shorter_than_poll() {
        let mut config = Config::default();
        config.release.poll_interval_secs = 30;
        config.release.max_wait_secs = 10;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_runner() {
        let mut config = Config::default();
        config.executor.runner = Some("".into());
        assert!(validate_config(&config).is_err());
    }
}
