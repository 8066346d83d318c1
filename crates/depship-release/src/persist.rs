//! Saving the release state

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use depship_core::ReleasePlan;

use crate::error::PersistError;
use crate::store::{CommandStateStore, StateSnapshot};

/// Durably saves the current state of a release
#[async_trait]
pub trait Persister: Send + Sync {
    /// Save the current state; returns whether anything changed since the last save
    async fn save(&self) -> Result<bool, PersistError>;
}

/// Copy of `plan` carrying the states of `snapshot`
pub fn plan_with_snapshot(plan: &ReleasePlan, snapshot: &StateSnapshot) -> ReleasePlan {
    let mut plan = plan.clone();
    plan.state = snapshot.release_state;
    for project in plan.projects.values_mut() {
        for (index, command) in project.commands.iter_mut().enumerate() {
            if let Some(record) = snapshot.record(&project.id, index) {
                command.state = record.state.clone();
                command.build_url = record.build_url.clone();
            }
        }
    }
    plan
}

/// Writes the plan with the current states as JSON to a file
pub struct JsonFilePersister {
    path: PathBuf,
    plan: Arc<ReleasePlan>,
    store: Arc<dyn CommandStateStore>,
    last_saved: Mutex<Option<String>>,
}

impl JsonFilePersister {
    pub fn new(
        path: impl Into<PathBuf>,
        plan: Arc<ReleasePlan>,
        store: Arc<dyn CommandStateStore>,
    ) -> Self {
        Self {
            path: path.into(),
            plan,
            store,
            last_saved: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Persister for JsonFilePersister {
    async fn save(&self) -> Result<bool, PersistError> {
        let plan = plan_with_snapshot(&self.plan, &self.store.snapshot());
        let json = serde_json::to_string_pretty(&plan)?;

        let mut last_saved = self.last_saved.lock().await;
        if last_saved.as_deref() == Some(json.as_str()) {
            return Ok(false);
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "release state saved");

        *last_saved = Some(json);
        Ok(true)
    }
}
