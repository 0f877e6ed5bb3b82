// Job Registry - process-wide progress tracking for batch jobs
//
// An explicit, constructed instance injected into the API layer; created
// at process start, dropped at shutdown. Jobs live here until the caller
// deletes them - there is no TTL, a leaked job persists until deleted or
// the process restarts. That is acceptable: jobs are transient progress
// trackers, the submission/outcome rows are the system of record.
//
// The map behind the mutex is the only shared mutable structure in the
// pipeline. Lock sections are small: insert, append-and-count, read, or
// remove; nothing awaits while holding the lock.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use gradeflow_common::types::{BatchItem, BatchJob, JobState};

#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<Uuid, BatchJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job and return its generated id.
    /// A job with nothing to do is born completed.
    pub fn create(&self, exam_id: Uuid, total: usize) -> Uuid {
        let id = Uuid::new_v4();
        let state = if total == 0 {
            JobState::Completed
        } else {
            JobState::Running
        };
        let job = BatchJob {
            id,
            exam_id,
            total,
            completed: 0,
            state,
            items: Vec::with_capacity(total),
            created_at: Utc::now(),
            cancelled: false,
            error: None,
        };

        let mut jobs = self.jobs.lock().expect("job registry mutex poisoned");
        jobs.insert(id, job);
        info!(job_id = %id, exam_id = %exam_id, total, "batch job registered");
        id
    }

    /// Record one finished item: append it and bump the completed counter
    /// in a single locked step, so concurrent workers can never double
    /// count or lose an update. Transitions to a terminal state exactly
    /// when the last item arrives; terminal jobs are never reopened.
    pub fn record_item(&self, job_id: &Uuid, item: BatchItem) -> bool {
        let mut jobs = self.jobs.lock().expect("job registry mutex poisoned");
        let Some(job) = jobs.get_mut(job_id) else {
            warn!(job_id = %job_id, "item reported for unknown job");
            return false;
        };

        if job.state != JobState::Running || job.completed >= job.total {
            warn!(job_id = %job_id, state = ?job.state, "item reported after job reached a terminal state");
            return false;
        }

        job.items.push(item);
        job.completed += 1;
        if job.completed == job.total {
            job.state = if job.cancelled {
                JobState::Failed
            } else {
                JobState::Completed
            };
        }
        true
    }

    /// Current snapshot of a job, or None when it is unknown or already
    /// cleaned up.
    pub fn snapshot(&self, job_id: &Uuid) -> Option<BatchJob> {
        let jobs = self.jobs.lock().expect("job registry mutex poisoned");
        jobs.get(job_id).cloned()
    }

    /// Advisory cancellation: in-flight items finish, nothing new starts.
    pub fn cancel(&self, job_id: &Uuid) -> bool {
        let mut jobs = self.jobs.lock().expect("job registry mutex poisoned");
        match jobs.get_mut(job_id) {
            Some(job) => {
                if job.state == JobState::Running {
                    job.cancelled = true;
                    info!(job_id = %job_id, completed = job.completed, "batch job cancellation requested");
                }
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self, job_id: &Uuid) -> bool {
        let jobs = self.jobs.lock().expect("job registry mutex poisoned");
        jobs.get(job_id).map(|j| j.cancelled).unwrap_or(false)
    }

    /// Force a job into the failed state with a reason. Used for runner
    /// bookkeeping failures and for cancelled jobs once their in-flight
    /// items have drained. No-op on jobs that already reached a terminal
    /// state.
    pub fn mark_failed(&self, job_id: &Uuid, reason: &str) -> bool {
        let mut jobs = self.jobs.lock().expect("job registry mutex poisoned");
        match jobs.get_mut(job_id) {
            Some(job) if job.state == JobState::Running => {
                job.state = JobState::Failed;
                job.error = Some(reason.to_string());
                warn!(job_id = %job_id, completed = job.completed, total = job.total, reason, "batch job failed");
                true
            }
            Some(_) => false,
            None => false,
        }
    }

    /// Explicit cleanup - the only way job memory is reclaimed.
    pub fn delete(&self, job_id: &Uuid) -> bool {
        let mut jobs = self.jobs.lock().expect("job registry mutex poisoned");
        let removed = jobs.remove(job_id).is_some();
        if removed {
            info!(job_id = %job_id, "batch job cleaned up");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradeflow_common::types::ExecutionStatus;
    use std::sync::Arc;

    fn make_item() -> BatchItem {
        BatchItem {
            submission_id: Uuid::new_v4(),
            status: ExecutionStatus::Accepted,
            score: 10.0,
            max_score: 10.0,
            error: None,
        }
    }

    #[test]
    fn test_create_and_snapshot() {
        let registry = JobRegistry::new();
        let exam_id = Uuid::new_v4();
        let job_id = registry.create(exam_id, 3);

        let snapshot = registry.snapshot(&job_id).unwrap();
        assert_eq!(snapshot.exam_id, exam_id);
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.completed, 0);
        assert_eq!(snapshot.state, JobState::Running);
    }

    #[test]
    fn test_empty_job_is_born_completed() {
        let registry = JobRegistry::new();
        let job_id = registry.create(Uuid::new_v4(), 0);

        let snapshot = registry.snapshot(&job_id).unwrap();
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.total, 0);
    }

    #[test]
    fn test_unknown_job_not_found() {
        let registry = JobRegistry::new();
        assert!(registry.snapshot(&Uuid::new_v4()).is_none());
        assert!(!registry.delete(&Uuid::new_v4()));
        assert!(!registry.cancel(&Uuid::new_v4()));
    }

    #[test]
    fn test_completion_on_last_item() {
        let registry = JobRegistry::new();
        let job_id = registry.create(Uuid::new_v4(), 2);

        assert!(registry.record_item(&job_id, make_item()));
        assert_eq!(registry.snapshot(&job_id).unwrap().state, JobState::Running);

        assert!(registry.record_item(&job_id, make_item()));
        let snapshot = registry.snapshot(&job_id).unwrap();
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.completed, 2);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let registry = JobRegistry::new();
        let job_id = registry.create(Uuid::new_v4(), 1);

        assert!(registry.record_item(&job_id, make_item()));
        // extra report after completion is refused, count stays exact
        assert!(!registry.record_item(&job_id, make_item()));

        let snapshot = registry.snapshot(&job_id).unwrap();
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.state, JobState::Completed);

        // a completed job cannot be failed afterwards
        assert!(!registry.mark_failed(&job_id, "too late"));
        assert_eq!(registry.snapshot(&job_id).unwrap().state, JobState::Completed);
    }

    #[test]
    fn test_cancelled_job_fails_on_last_item() {
        let registry = JobRegistry::new();
        let job_id = registry.create(Uuid::new_v4(), 1);

        assert!(registry.cancel(&job_id));
        assert!(registry.is_cancelled(&job_id));

        assert!(registry.record_item(&job_id, make_item()));
        let snapshot = registry.snapshot(&job_id).unwrap();
        assert_eq!(snapshot.state, JobState::Failed);
        assert_eq!(snapshot.completed, 1);
    }

    #[test]
    fn test_delete_reclaims_job() {
        let registry = JobRegistry::new();
        let job_id = registry.create(Uuid::new_v4(), 1);

        assert!(registry.delete(&job_id));
        assert!(registry.snapshot(&job_id).is_none());
        assert!(!registry.delete(&job_id));
    }

    #[test]
    fn test_concurrent_updates_count_exactly_once() {
        let registry = Arc::new(JobRegistry::new());
        let total = 64;
        let job_id = registry.create(Uuid::new_v4(), total);

        let handles: Vec<_> = (0..total)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    assert!(registry.record_item(&job_id, make_item()));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot(&job_id).unwrap();
        assert_eq!(snapshot.completed, total);
        assert_eq!(snapshot.items.len(), total);
        assert_eq!(snapshot.state, JobState::Completed);
    }
}
