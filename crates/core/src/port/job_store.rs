// Job Record Store Port (Interface)

use crate::domain::{Job, JobId, JobStatus};
use crate::error::Result;
use async_trait::async_trait;

/// Partial update applied to a job record. `None` fields are left
/// untouched; `updated_at` is always bumped by the store.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub current_step: Option<String>,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: Option<i64>,
}

impl JobPatch {
    /// Progress update before a pipeline step.
    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            current_step: Some(step.into()),
            progress_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Terminal transition patch; `completed_at` is set exactly once
    /// because terminal records refuse further updates.
    pub fn terminal(status: JobStatus, completed_at: i64) -> Self {
        Self {
            status: Some(status),
            completed_at: Some(completed_at),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.progress_message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }
}

/// Repository interface for the durable job queue.
///
/// The store is the only shared mutable resource in the system; every
/// operation here must be safe under concurrent callers from multiple
/// worker processes.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new pending job. `AppError::Conflict` on duplicate id.
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// Atomically claim the oldest pending job (FIFO by creation time)
    /// and transition it to processing. Exactly one concurrent caller
    /// receives a given job; the rest see `None`.
    async fn claim_next(&self) -> Result<Option<Job>>;

    /// Merge fields into a job record. Missing or already-terminal jobs
    /// make this a warned no-op, not an error.
    async fn update(&self, id: &JobId, patch: JobPatch) -> Result<()>;

    /// Minimal-projection read of the cancellation flag.
    /// A missing job reads as not cancelled.
    async fn is_cancelled(&self, id: &JobId) -> Result<bool>;

    /// Conditionally cancel: only pending/processing jobs are affected.
    /// Sets `cancelled`, status, `completed_at` and `updated_at` in one
    /// atomic write; returns whether a record was modified.
    async fn cancel(&self, id: &JobId, at_millis: i64) -> Result<bool>;

    /// All jobs for a project, newest first.
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Job>>;

    /// Startup crash recovery: every processing job is reset to pending
    /// (an orphaned processing row is indistinguishable from a crashed
    /// worker's claim). Returns the number of rows reset.
    async fn reset_stale_processing(&self) -> Result<u64>;

    /// Retention sweep: delete records created before the cutoff,
    /// regardless of status. Returns the number of rows deleted.
    async fn delete_older_than(&self, cutoff_millis: i64) -> Result<u64>;

    /// Count of pending + processing jobs (operator visibility).
    async fn count_active(&self) -> Result<i64>;
}

// ============================================================================
// In-memory implementation for tests
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::port::TimeProvider;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tracing::{debug, warn};

    /// In-memory JobStore with the same semantics as the SQLite adapter
    /// (claim atomicity via the map lock, terminal-guarded updates).
    pub struct MemoryJobStore {
        jobs: Mutex<HashMap<JobId, Job>>,
        time: Arc<dyn TimeProvider>,
    }

    impl MemoryJobStore {
        pub fn new(time: Arc<dyn TimeProvider>) -> Self {
            Self {
                jobs: Mutex::new(HashMap::new()),
                time,
            }
        }
    }

    #[async_trait]
    impl JobStore for MemoryJobStore {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&job.id) {
                return Err(crate::AppError::Conflict(format!(
                    "job {} already exists",
                    job.id
                )));
            }
            jobs.insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self.jobs.lock().unwrap().get(id).cloned())
        }

        async fn claim_next(&self) -> Result<Option<Job>> {
            let mut jobs = self.jobs.lock().unwrap();
            let next_id = jobs
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .min_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.id.cmp(&b.id))
                })
                .map(|j| j.id.clone());

            Ok(next_id.map(|id| {
                let job = jobs.get_mut(&id).unwrap();
                job.status = JobStatus::Processing;
                job.updated_at = self.time.now_millis();
                job.clone()
            }))
        }

        async fn update(&self, id: &JobId, patch: JobPatch) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = match jobs.get_mut(id) {
                Some(j) if !j.status.is_terminal() => j,
                Some(_) => {
                    debug!(job_id = %id, "Update ignored: job already terminal");
                    return Ok(());
                }
                None => {
                    warn!(job_id = %id, "Update ignored: job not found");
                    return Ok(());
                }
            };

            if let Some(status) = patch.status {
                job.status = status;
            }
            if let Some(step) = patch.current_step {
                job.current_step = Some(step);
            }
            if let Some(message) = patch.progress_message {
                job.progress_message = Some(message);
            }
            if let Some(error) = patch.error_message {
                job.error_message = Some(error);
            }
            if let Some(at) = patch.completed_at {
                job.completed_at = Some(at);
            }
            job.updated_at = self.time.now_millis();
            Ok(())
        }

        async fn is_cancelled(&self, id: &JobId) -> Result<bool> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .get(id)
                .map(|j| j.cancelled)
                .unwrap_or(false))
        }

        async fn cancel(&self, id: &JobId, at_millis: i64) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get_mut(id) {
                Some(job) if !job.status.is_terminal() => {
                    job.cancelled = true;
                    job.status = JobStatus::Cancelled;
                    job.completed_at = Some(at_millis);
                    job.updated_at = at_millis;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn list_by_project(&self, project_id: &str) -> Result<Vec<Job>> {
            let jobs = self.jobs.lock().unwrap();
            let mut list: Vec<Job> = jobs
                .values()
                .filter(|j| j.project_id == project_id)
                .cloned()
                .collect();
            list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(list)
        }

        async fn reset_stale_processing(&self) -> Result<u64> {
            let mut jobs = self.jobs.lock().unwrap();
            let now = self.time.now_millis();
            let mut reset = 0;
            for job in jobs.values_mut() {
                if job.status == JobStatus::Processing {
                    job.status = JobStatus::Pending;
                    job.updated_at = now;
                    reset += 1;
                }
            }
            Ok(reset)
        }

        async fn delete_older_than(&self, cutoff_millis: i64) -> Result<u64> {
            let mut jobs = self.jobs.lock().unwrap();
            let before = jobs.len();
            jobs.retain(|_, j| j.created_at >= cutoff_millis);
            Ok((before - jobs.len()) as u64)
        }

        async fn count_active(&self) -> Result<i64> {
            Ok(self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| !j.status.is_terminal())
                .count() as i64)
        }
    }
}
