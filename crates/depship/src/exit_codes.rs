//! Exit codes for the CLI

use depship_core::{ConfigError, CoreError};
use depship_release::ReleaseError;

/// Success
#[allow(dead_code)]
pub const SUCCESS: i32 = 0;

/// General error
pub const ERROR: i32 = 1;

/// Configuration or release plan error
pub const CONFIG_ERROR: i32 = 2;

/// The release ran but did not succeed
pub const RELEASE_FAILED: i32 = 3;

/// Exit code for an error that ended the command
pub fn for_error(error: &anyhow::Error) -> i32 {
    if error.downcast_ref::<ConfigError>().is_some() {
        return CONFIG_ERROR;
    }
    if let Some(CoreError::Config(_) | CoreError::Plan(_)) = error.downcast_ref::<CoreError>() {
        return CONFIG_ERROR;
    }
    match error.downcast_ref::<ReleaseError>() {
        Some(
            ReleaseError::MissingConfig(_)
            | ReleaseError::InvalidConfig { .. }
            | ReleaseError::Plan(_),
        ) => CONFIG_ERROR,
        _ => ERROR,
    }
}
