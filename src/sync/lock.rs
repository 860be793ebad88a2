//! Per-project advisory sync locks.
//!
//! One logical writer per project at a time: a push takes the project's
//! lock for its full duration. Locks are process-local leases with a
//! wall-clock timeout; an expired lease is superseded by the next acquire
//! rather than swept by a background task, and acquire never queues.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default lease length for a held sync lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// A held lock: who holds it and when the lease lapses
#[derive(Debug, Clone)]
pub struct SyncLock {
    pub locked_by: String,
    pub locked_at: Instant,
    pub expires_at: Instant,
}

/// Process-local advisory lock table keyed by project id
pub struct SyncLockCoordinator {
    locks: DashMap<String, SyncLock>,
    timeout: Duration,
}

impl SyncLockCoordinator {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Try to take the lock for a project.
    ///
    /// Grants when the project is unlocked, the current lease has expired,
    /// or the caller already holds it (renewal refreshes the lease).
    /// Returns `false` on contention; callers fail fast rather than wait.
    pub fn acquire(&self, project_id: &str, owner: &str) -> bool {
        let now = Instant::now();
        match self.locks.entry(project_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let lock = entry.get_mut();
                if lock.locked_by == owner || now >= lock.expires_at {
                    *lock = self.lease(owner, now);
                    true
                } else {
                    debug!(
                        "Sync lock contention on {} (held by {})",
                        project_id, lock.locked_by
                    );
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(self.lease(owner, now));
                true
            }
        }
    }

    /// Release the project's lock if `owner` holds it.
    ///
    /// Returns `false` when the lock is absent or held by someone else;
    /// releasing is owner-checked so a timed-out writer cannot drop a
    /// successor's lease.
    pub fn release(&self, project_id: &str, owner: &str) -> bool {
        let removed = self
            .locks
            .remove_if(project_id, |_, lock| lock.locked_by == owner)
            .is_some();
        if !removed {
            debug!("Sync lock release no-op on {} for {}", project_id, owner);
        }
        removed
    }

    /// Current unexpired holder of a project's lock, if any
    pub fn holder(&self, project_id: &str) -> Option<String> {
        self.locks.get(project_id).and_then(|lock| {
            if Instant::now() < lock.expires_at {
                Some(lock.locked_by.clone())
            } else {
                None
            }
        })
    }

    fn lease(&self, owner: &str, now: Instant) -> SyncLock {
        SyncLock {
            locked_by: owner.to_string(),
            locked_at: now,
            expires_at: now + self.timeout,
        }
    }
}

impl Default for SyncLockCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
