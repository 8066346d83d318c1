//! depship-core - Release plan model for depship
//!
//! This crate provides the data model of a release run (projects, commands,
//! command states and the release plan graph), loading and validation of
//! release plans, and the tool configuration.

pub mod config;
pub mod error;
pub mod plan;

pub use error::{ConfigError, CoreError, PlanError, Result};
pub use plan::{
    Command, CommandKind, CommandState, ConfigKey, Project, ProjectId, ReleasePlan, ReleaseState,
};
