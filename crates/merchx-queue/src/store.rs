//! Job storage repository.
//!
//! The trait is the contract the queue requires from a durable job table:
//! indexed pickup by status and schedule time, row-level transitions, batch
//! aggregation, and a compare-and-set single-flight flag. The in-memory
//! implementation backs tests and single-process deployments.

use std::collections::BTreeMap;
use std::sync::Mutex;

use time::OffsetDateTime;

use crate::job::{Job, JobStatus, StatusCounts};

/// Durable job table contract.
pub trait JobStore: Send + Sync {
    /// Inserts the job, assigning and returning its id.
    fn insert(&self, job: Job) -> u64;

    fn get(&self, id: u64) -> Option<Job>;

    /// Row-level replace; returns false when the id is unknown.
    fn update(&self, job: Job) -> bool;

    /// Pending jobs whose `scheduled_at` has passed, ordered by priority
    /// descending then schedule time ascending.
    fn due_jobs(&self, now: OffsetDateTime, limit: usize) -> Vec<Job>;

    fn jobs_in_batch(&self, batch_id: &str) -> Vec<Job>;

    fn batch_counts(&self, batch_id: &str) -> StatusCounts;

    /// Queue-wide counts plus the number of distinct batches.
    fn global_counts(&self) -> (StatusCounts, usize);

    /// Cancels a job only while it is still pending.
    fn cancel_pending(&self, id: u64) -> bool;

    fn cancel_batch_pending(&self, batch_id: &str) -> usize;

    /// Resets failed jobs (optionally batch-scoped) to pending with zero
    /// attempts, scheduled immediately.
    fn retry_failed(&self, batch_id: Option<&str>, now: OffsetDateTime) -> usize;

    /// Deletes terminal jobs whose completion predates the cutoff.
    fn delete_terminal_before(&self, cutoff: OffsetDateTime) -> usize;

    /// Returns stale processing claims (started before the cutoff) to
    /// pending so a crashed worker's jobs run again (at-least-once).
    fn reclaim_stale_processing(&self, cutoff: OffsetDateTime) -> usize;

    /// Atomically claims the single-flight processing flag. A flag older
    /// than `stale_after` is treated as abandoned and taken over.
    fn try_acquire_processing_flag(
        &self,
        now: OffsetDateTime,
        stale_after: time::Duration,
    ) -> bool;

    fn release_processing_flag(&self);

    fn set_stop_signal(&self, stop: bool);

    fn stop_requested(&self) -> bool;
}

struct StoreInner {
    jobs: BTreeMap<u64, Job>,
    next_id: u64,
    processing_flag: Option<OffsetDateTime>,
    stop: bool,
}

/// In-process job store. Every time comparison takes `now` as an argument,
/// so the store itself carries no clock.
pub struct MemoryJobStore {
    inner: Mutex<StoreInner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                jobs: BTreeMap::new(),
                next_id: 1,
                processing_flag: None,
                stop: false,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("job store lock is not poisoned").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, mut job: Job) -> u64 {
        let mut inner = self.inner.lock().expect("job store lock is not poisoned");
        let id = inner.next_id;
        inner.next_id += 1;
        job.id = id;
        inner.jobs.insert(id, job);
        id
    }

    fn get(&self, id: u64) -> Option<Job> {
        self.inner
            .lock()
            .expect("job store lock is not poisoned")
            .jobs
            .get(&id)
            .cloned()
    }

    fn update(&self, job: Job) -> bool {
        let mut inner = self.inner.lock().expect("job store lock is not poisoned");
        if inner.jobs.contains_key(&job.id) {
            inner.jobs.insert(job.id, job);
            true
        } else {
            false
        }
    }

    fn due_jobs(&self, now: OffsetDateTime, limit: usize) -> Vec<Job> {
        let inner = self.inner.lock().expect("job store lock is not poisoned");
        let mut due: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending && job.scheduled_at <= now)
            .cloned()
            .collect();

        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.scheduled_at.cmp(&b.scheduled_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        due.truncate(limit);
        due
    }

    fn jobs_in_batch(&self, batch_id: &str) -> Vec<Job> {
        let inner = self.inner.lock().expect("job store lock is not poisoned");
        inner
            .jobs
            .values()
            .filter(|job| job.batch_id.as_deref() == Some(batch_id))
            .cloned()
            .collect()
    }

    fn batch_counts(&self, batch_id: &str) -> StatusCounts {
        let inner = self.inner.lock().expect("job store lock is not poisoned");
        let mut counts = StatusCounts::default();
        for job in inner.jobs.values() {
            if job.batch_id.as_deref() == Some(batch_id) {
                counts.absorb(job.status);
            }
        }
        counts
    }

    fn global_counts(&self) -> (StatusCounts, usize) {
        let inner = self.inner.lock().expect("job store lock is not poisoned");
        let mut counts = StatusCounts::default();
        let mut batches = std::collections::BTreeSet::new();
        for job in inner.jobs.values() {
            counts.absorb(job.status);
            if let Some(batch_id) = &job.batch_id {
                batches.insert(batch_id.clone());
            }
        }
        (counts, batches.len())
    }

    fn cancel_pending(&self, id: u64) -> bool {
        let mut inner = self.inner.lock().expect("job store lock is not poisoned");
        match inner.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    fn cancel_batch_pending(&self, batch_id: &str) -> usize {
        let mut inner = self.inner.lock().expect("job store lock is not poisoned");
        let mut cancelled = 0;
        for job in inner.jobs.values_mut() {
            if job.batch_id.as_deref() == Some(batch_id) && job.status == JobStatus::Pending {
                job.status = JobStatus::Cancelled;
                cancelled += 1;
            }
        }
        cancelled
    }

    fn retry_failed(&self, batch_id: Option<&str>, now: OffsetDateTime) -> usize {
        let mut inner = self.inner.lock().expect("job store lock is not poisoned");
        let mut reset = 0;
        for job in inner.jobs.values_mut() {
            if job.status != JobStatus::Failed {
                continue;
            }
            if batch_id.is_some() && job.batch_id.as_deref() != batch_id {
                continue;
            }
            job.status = JobStatus::Pending;
            job.attempts = 0;
            job.scheduled_at = now;
            job.error_message = None;
            job.completed_at = None;
            reset += 1;
        }
        reset
    }

    fn delete_terminal_before(&self, cutoff: OffsetDateTime) -> usize {
        let mut inner = self.inner.lock().expect("job store lock is not poisoned");
        let before = inner.jobs.len();
        inner.jobs.retain(|_, job| {
            let done_at = job.completed_at.unwrap_or(job.created_at);
            !(job.status.is_terminal() && done_at < cutoff)
        });
        before - inner.jobs.len()
    }

    fn reclaim_stale_processing(&self, cutoff: OffsetDateTime) -> usize {
        let mut inner = self.inner.lock().expect("job store lock is not poisoned");
        let mut reclaimed = 0;
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Processing
                && job.started_at.is_some_and(|started| started < cutoff)
            {
                job.status = JobStatus::Pending;
                reclaimed += 1;
            }
        }
        reclaimed
    }

    fn try_acquire_processing_flag(
        &self,
        now: OffsetDateTime,
        stale_after: time::Duration,
    ) -> bool {
        let mut inner = self.inner.lock().expect("job store lock is not poisoned");
        match inner.processing_flag {
            Some(claimed_at) if now - claimed_at < stale_after => false,
            _ => {
                inner.processing_flag = Some(now);
                true
            }
        }
    }

    fn release_processing_flag(&self) {
        self.inner
            .lock()
            .expect("job store lock is not poisoned")
            .processing_flag = None;
    }

    fn set_stop_signal(&self, stop: bool) {
        self.inner.lock().expect("job store lock is not poisoned").stop = stop;
    }

    fn stop_requested(&self) -> bool {
        self.inner.lock().expect("job store lock is not poisoned").stop
    }
}
