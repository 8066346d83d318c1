//! Release plan model
//!
//! A [`ReleasePlan`] is the immutable graph handed to the orchestrator: the
//! projects, who depends on whom, submodule groupings and the job
//! configuration. The only mutable part during a run is the state of each
//! [`Command`], which the orchestrator tracks outside the plan.

mod command;
mod project;
mod release_plan;

pub use command::{Command, CommandKind, CommandState};
pub use project::{Project, ProjectId};
pub use release_plan::{ConfigKey, ReleasePlan, ReleaseState};
