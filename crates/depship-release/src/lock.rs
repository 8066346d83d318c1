//! Per-project mutual exclusion

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use depship_core::ProjectId;

type LockTable = Mutex<HashMap<ProjectId, Arc<AsyncMutex<()>>>>;

/// Held while a project is being released; dropping it lets the next waiter in
#[derive(Debug)]
pub struct ProjectLockGuard {
    project: ProjectId,
    table: Arc<LockTable>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for ProjectLockGuard {
    fn drop(&mut self) {
        let mut locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the table and this guard refer to the lock: nobody is waiting
        let idle = locks
            .get(&self.project)
            .map(|lock| Arc::strong_count(lock) <= 2)
            .unwrap_or(false);
        if idle {
            locks.remove(&self.project);
        }
    }
}

/// Lock table serializing releases of the same project.
///
/// A project reachable over several paths of the graph (a diamond) is
/// released by the first path; later paths wait and then see the settled
/// states. Entries only live while the project is held or awaited.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    table: Arc<LockTable>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, project: &ProjectId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(project.clone()).or_default().clone()
    }

    /// Acquire the lock of a project, waiting behind the current holder
    pub async fn acquire(&self, project: &ProjectId) -> ProjectLockGuard {
        let handle = self.handle(project);
        let guard = match handle.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!(%project, "project is being released, waiting");
                handle.lock_owned().await
            }
        };
        ProjectLockGuard {
            project: project.clone(),
            table: self.table.clone(),
            _guard: guard,
        }
    }

    #[cfg(test)]
    fn is_locked(&self, project: &ProjectId) -> bool {
        let locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(project)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
