//! depship-release - Release orchestration engine
//!
//! Walks a [`ReleasePlan`](depship_core::ReleasePlan) from its root, runs the
//! commands of each project in order by triggering CI jobs, and fans out to
//! dependent projects once a project is released. Command states live in a
//! [`CommandStateStore`]; the run can be resumed after an interruption by
//! re-polling jobs that were already started.

pub mod combinators;
pub mod error;
pub mod job;
pub mod lock;
pub mod persist;
pub mod releaser;
pub mod reporter;
pub mod shell;
pub mod store;
pub mod verdict;

pub use combinators::{join_all, run_fail_fast, SequenceOutcome};
pub use error::{ExecutorError, PersistError, ReleaseError, Result};
pub use job::{
    JobExecutionData, JobExecutionDataFactory, JobExecutor, JobObserver, JobOutcome, PollSettings,
};
pub use lock::{ProjectLockGuard, ProjectLocks};
pub use persist::{plan_with_snapshot, JsonFilePersister, Persister};
pub use releaser::{ReleaseSummary, Releaser};
pub use reporter::{
    CollectingReporter, ReleaseEvent, ReleaseReporter, ReporterRegistry, TracingReporter,
};
pub use shell::ShellJobExecutor;
pub use store::{CommandRecord, CommandStateStore, InMemoryStateStore, StateSnapshot};
pub use verdict::{evaluate, ProjectResults, Verdict};
