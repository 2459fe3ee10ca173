// Job Service - the submission/status/cancel surface consumed by the
// external API layer. Read/write access goes through the same store the
// worker polls; there is no other coordination channel.

use crate::domain::{Job, JobId, JobKind, JobStatus};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobStore, TimeProvider};
use std::sync::Arc;
use tracing::{info, warn};

/// Submission request. The caller has already staged the input artifact
/// (remote scratch blob, and for point clouds a local working file).
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub project_id: String,
    pub kind: JobKind,
    pub source_key: Option<String>,
    pub local_path: Option<String>,
    /// Caller-supplied id; generated when absent.
    pub job_id: Option<String>,
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Idempotent no-op: the job was already cancelled.
    AlreadyCancelled,
}

pub struct JobService {
    jobs: Arc<dyn JobStore>,
    ids: Arc<dyn IdProvider>,
    time: Arc<dyn TimeProvider>,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        ids: Arc<dyn IdProvider>,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        Self { jobs, ids, time }
    }

    /// Enqueue a new job. `AppError::Conflict` when a caller-supplied id
    /// collides.
    pub async fn submit(&self, req: SubmitRequest) -> Result<JobId> {
        let id = req.job_id.unwrap_or_else(|| self.ids.generate_id());
        let now = self.time.now_millis();

        let mut job = Job::new(id.clone(), now, req.project_id, req.kind, req.source_key);
        job.local_path = req.local_path;

        self.jobs.insert(&job).await?;
        info!(job_id = %id, kind = %job.kind, project_id = %job.project_id, "Job submitted");
        Ok(id)
    }

    pub async fn job(&self, id: &JobId) -> Result<Option<Job>> {
        self.jobs.find_by_id(id).await
    }

    pub async fn jobs_for_project(&self, project_id: &str) -> Result<Vec<Job>> {
        self.jobs.list_by_project(project_id).await
    }

    /// Cancel a job. Completed/failed jobs are rejected with `Conflict`;
    /// cancelling twice is an idempotent success.
    ///
    /// The store's conditional update is authoritative: the status
    /// pre-check only classifies the reply, and when the two disagree
    /// (the job reached a terminal status in between) the record is
    /// re-read so both race orders resolve deterministically.
    pub async fn cancel(&self, id: &JobId) -> Result<CancelOutcome> {
        let job = self
            .jobs
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {} not found", id)))?;

        match job.status {
            JobStatus::Cancelled => return Ok(CancelOutcome::AlreadyCancelled),
            JobStatus::Completed | JobStatus::Failed => {
                return Err(AppError::Conflict(format!(
                    "cannot cancel {} job {}",
                    job.status, id
                )));
            }
            JobStatus::Pending | JobStatus::Processing => {}
        }

        let now = self.time.now_millis();
        if self.jobs.cancel(id, now).await? {
            info!(job_id = %id, previous_status = %job.status, "Job cancelled");
            return Ok(CancelOutcome::Cancelled);
        }

        // Lost the race: the job went terminal between check and update
        match self.jobs.find_by_id(id).await? {
            Some(j) if j.status == JobStatus::Cancelled => Ok(CancelOutcome::AlreadyCancelled),
            Some(j) => Err(AppError::Conflict(format!(
                "cannot cancel {} job {}",
                j.status, id
            ))),
            None => Err(AppError::NotFound(format!("job {} not found", id))),
        }
    }

    /// Cancel every active job of a project; terminal jobs are skipped
    /// and per-job failures do not stop the batch. Returns the ids that
    /// were actually cancelled.
    pub async fn cancel_all_for_project(&self, project_id: &str) -> Result<Vec<JobId>> {
        let jobs = self.jobs.list_by_project(project_id).await?;
        let mut cancelled = Vec::new();

        for job in jobs.into_iter().filter(|j| !j.status.is_terminal()) {
            match self.cancel(&job.id).await {
                Ok(CancelOutcome::Cancelled) => cancelled.push(job.id),
                Ok(CancelOutcome::AlreadyCancelled) => {}
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to cancel job; continuing")
                }
            }
        }

        info!(project_id = %project_id, cancelled = cancelled.len(), "Batch cancellation finished");
        Ok(cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_store::mocks::MemoryJobStore;
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use crate::port::JobPatch;

    fn service() -> (JobService, Arc<MemoryJobStore>, Arc<FixedTimeProvider>) {
        let time = Arc::new(FixedTimeProvider::new(10_000));
        let jobs = Arc::new(MemoryJobStore::new(time.clone()));
        let service = JobService::new(
            jobs.clone(),
            Arc::new(SequentialIdProvider::new()),
            time.clone(),
        );
        (service, jobs, time)
    }

    fn request(project_id: &str) -> SubmitRequest {
        SubmitRequest {
            project_id: project_id.to_string(),
            kind: JobKind::PointCloud,
            source_key: Some("jobs/x.laz".to_string()),
            local_path: None,
            job_id: None,
        }
    }

    #[tokio::test]
    async fn submit_assigns_id_and_pending_status() {
        let (service, jobs, _) = service();
        let id = service.submit(request("PROJ-1")).await.unwrap();
        assert_eq!(id, "id-1");

        let job = jobs.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.created_at, 10_000);
    }

    #[tokio::test]
    async fn duplicate_caller_id_is_a_conflict() {
        let (service, _, _) = service();
        let mut req = request("PROJ-1");
        req.job_id = Some("fixed".to_string());
        service.submit(req.clone()).await.unwrap();

        let err = service.submit(req).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_rejects_terminal() {
        let (service, jobs, time) = service();
        let id = service.submit(request("PROJ-1")).await.unwrap();

        assert_eq!(service.cancel(&id).await.unwrap(), CancelOutcome::Cancelled);
        let job = jobs.find_by_id(&id).await.unwrap().unwrap();
        assert!(job.cancelled);
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.completed_at, Some(10_000));

        // Second cancel: non-error, record unchanged
        time.advance(5_000);
        assert_eq!(
            service.cancel(&id).await.unwrap(),
            CancelOutcome::AlreadyCancelled
        );
        let again = jobs.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(again.completed_at, Some(10_000));
        assert_eq!(again.updated_at, job.updated_at);
    }

    #[tokio::test]
    async fn cancel_of_completed_job_is_rejected_without_mutation() {
        let (service, jobs, _) = service();
        let id = service.submit(request("PROJ-1")).await.unwrap();
        jobs.claim_next().await.unwrap().unwrap();
        jobs.update(&id, JobPatch::terminal(JobStatus::Completed, 11_000))
            .await
            .unwrap();

        let err = service.cancel(&id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let job = jobs.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(!job.cancelled);
    }

    #[tokio::test]
    async fn cancel_of_missing_job_is_not_found() {
        let (service, _, _) = service();
        let err = service.cancel(&"ghost".to_string()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn batch_cancel_skips_terminal_jobs() {
        let (service, jobs, _) = service();
        let a = service.submit(request("PROJ-9")).await.unwrap();
        let b = service.submit(request("PROJ-9")).await.unwrap();
        let c = service.submit(request("PROJ-9")).await.unwrap();
        let other = service.submit(request("PROJ-OTHER")).await.unwrap();

        // b completes before the batch cancel arrives
        jobs.claim_next().await.unwrap();
        jobs.update(&b, JobPatch::terminal(JobStatus::Completed, 11_000))
            .await
            .unwrap();

        let mut cancelled = service.cancel_all_for_project("PROJ-9").await.unwrap();
        cancelled.sort();
        let mut expected = vec![a.clone(), c.clone()];
        expected.sort();
        assert_eq!(cancelled, expected);

        assert_eq!(
            jobs.find_by_id(&other).await.unwrap().unwrap().status,
            JobStatus::Pending
        );
        assert_eq!(
            jobs.find_by_id(&b).await.unwrap().unwrap().status,
            JobStatus::Completed
        );
    }
}
