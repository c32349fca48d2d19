// crates/jobs/src/store.rs
//! In-memory job registry with active and finished partitions.
//!
//! A job id lives in exactly one partition at a time. The move from active to
//! finished happens at most once; a repeat attempt is a no-op so the pump's
//! finalize-on-exit path and the manager's lazy-finalize path can race
//! safely. Finished jobs are evicted opportunistically at each submission
//! once their retention window lapses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;

use crate::error::JobError;
use crate::types::{Job, JobId, JobKind, JobSummary};

/// Shared handle to one job's mutable record.
pub type JobSlot = Arc<Mutex<Job>>;

/// Lock a job slot. A poisoned mutex still holds a structurally valid job
/// (all writers keep the record consistent at every await point), so we take
/// the inner value instead of propagating the panic.
pub(crate) fn lock_job(slot: &Mutex<Job>) -> MutexGuard<'_, Job> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct JobStore {
    active: RwLock<HashMap<JobId, JobSlot>>,
    finished: RwLock<HashMap<JobId, JobSlot>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admission-check and register a new job in one atomic step.
    ///
    /// The Build concurrency cap is evaluated against the active partition
    /// under the same write lock that inserts the job, so two racing
    /// submissions cannot both observe room under the cap.
    pub fn admit(&self, job: Job, max_builds: Option<usize>) -> Result<JobSlot, JobError> {
        let mut active = write_lock(&self.active);

        if job.kind == JobKind::Build {
            if let Some(limit) = max_builds {
                let running_builds = active
                    .values()
                    .filter(|slot| lock_job(slot).kind == JobKind::Build)
                    .count();
                if running_builds >= limit {
                    return Err(JobError::AtCapacity { limit });
                }
            }
        }

        let id = job.id;
        let slot: JobSlot = Arc::new(Mutex::new(job));
        active.insert(id, Arc::clone(&slot));
        Ok(slot)
    }

    /// Look up a job in either partition.
    pub fn get(&self, id: JobId) -> Option<JobSlot> {
        if let Some(slot) = read_lock(&self.active).get(&id) {
            return Some(Arc::clone(slot));
        }
        read_lock(&self.finished).get(&id).map(Arc::clone)
    }

    /// Drop a job that was admitted but whose process failed to launch.
    pub fn remove_active(&self, id: JobId) {
        write_lock(&self.active).remove(&id);
    }

    /// Move a job from the active to the finished partition. Returns false
    /// if the id is not active (already moved, or never existed).
    pub fn move_to_finished(&self, id: JobId) -> bool {
        // Lock order: active before finished, everywhere.
        let mut active = write_lock(&self.active);
        let Some(slot) = active.remove(&id) else {
            return false;
        };
        write_lock(&self.finished).insert(id, slot);
        tracing::debug!(job_id = %id, "job moved to finished partition");
        true
    }

    /// Summaries across both partitions, newest first.
    pub fn list(&self) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> = read_lock(&self.active)
            .values()
            .chain(read_lock(&self.finished).values())
            .map(|slot| lock_job(slot).summary())
            .collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries
    }

    /// Remove finished jobs whose `finished_at` precedes `now - retention`.
    /// Active jobs are never touched, regardless of age.
    pub fn evict_finished_older_than(&self, retention: Duration) {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        let cutoff = Utc::now() - retention;

        let mut finished = write_lock(&self.finished);
        finished.retain(|id, slot| {
            let expired = matches!(lock_job(slot).finished_at, Some(at) if at < cutoff);
            if expired {
                tracing::debug!(job_id = %id, "evicting finished job past retention");
            }
            !expired
        });
    }

    pub fn active_len(&self) -> usize {
        read_lock(&self.active).len()
    }

    pub fn finished_len(&self) -> usize {
        read_lock(&self.finished).len()
    }
}
