use std::sync::{Arc, Mutex, MutexGuard};

use folio_core::LeaseHandle;
use folio_release::Task;

/// The task of the release currently being built and the lock leases the
/// build holds, shared with the process shutdown hook so an interrupted
/// build is neither left `started` nor leaves its locks behind.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    slot: Arc<Mutex<Slot>>,
}

#[derive(Debug, Default)]
struct Slot {
    task: Option<Task>,
    leases: Vec<LeaseHandle>,
    abandoned: bool,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track the task being built. Once the slot is abandoned the task is
    /// marked failed straight away.
    pub fn set(&self, task: Task) {
        let mut slot = self.lock();
        if slot.abandoned {
            drop(slot);
            fail_task(&task);
            return;
        }
        slot.task = Some(task);
    }

    pub fn clear(&self) {
        self.lock().task.take();
    }

    pub fn take(&self) -> Option<Task> {
        self.lock().task.take()
    }

    pub fn current(&self) -> Option<Task> {
        self.lock().task.clone()
    }

    /// Track a lease held by the build. Once the slot is abandoned the lease
    /// is revoked straight away.
    pub fn hold(&self, lease: LeaseHandle) {
        let mut slot = self.lock();
        if slot.abandoned {
            drop(slot);
            revoke(&lease);
            return;
        }
        slot.leases.push(lease);
    }

    /// Stop tracking the lease of the lock named `name`.
    pub fn forget(&self, name: &str) {
        self.lock().leases.retain(|lease| lease.name() != name);
    }

    pub fn held_leases(&self) -> Vec<String> {
        self.lock()
            .leases
            .iter()
            .map(|lease| lease.name().to_string())
            .collect()
    }

    /// Revoke every tracked lease. Returns how many lease files were
    /// removed. Errors are logged.
    pub fn release_leases(&self) -> usize {
        let leases = std::mem::take(&mut self.lock().leases);
        leases.iter().filter(|lease| revoke(lease)).count()
    }

    /// Give up on the build for good: mark its task failed, revoke its
    /// leases and refuse anything it registers later. Returns whether a task
    /// was marked.
    pub fn abandon(&self) -> bool {
        self.lock().abandoned = true;
        let marked = self.mark_failed();
        let removed = self.release_leases();
        if removed > 0 {
            tracing::warn!(count = removed, "released locks of abandoned build");
        }
        marked
    }

    pub fn is_abandoned(&self) -> bool {
        self.lock().abandoned
    }

    /// Mark the in-flight task failed, if there is one. Returns whether a
    /// task was marked. Errors are logged.
    pub fn mark_failed(&self) -> bool {
        let Some(task) = self.take() else {
            return false;
        };
        fail_task(&task)
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn fail_task(task: &Task) -> bool {
    match task.set_failed() {
        Ok(changed) => {
            tracing::warn!(
                release = %task.release_id(),
                task = task.name(),
                changed,
                "marked in-flight build task failed",
            );
            true
        }
        Err(err) => {
            tracing::error!(
                release = %task.release_id(),
                error = %err,
                "failed to mark in-flight build task failed",
            );
            false
        }
    }
}

fn revoke(lease: &LeaseHandle) -> bool {
    match lease.revoke() {
        Ok(removed) => removed,
        Err(err) => {
            tracing::error!(lock = lease.name(), error = %err, "failed to revoke lock lease");
            false
        }
    }
}
