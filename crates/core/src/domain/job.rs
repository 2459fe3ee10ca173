// Job Domain Model

use serde::{Deserialize, Serialize};

/// Job ID (UUID v4, or caller-supplied)
pub type JobId = String;

/// Conversion pipeline selector. Closed set: each kind owns a fixed
/// step sequence in the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    PointCloud,
    Ortho,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::PointCloud => "point_cloud",
            JobKind::Ortho => "ortho",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "point_cloud" => Some(JobKind::PointCloud),
            "ortho" => Some(JobKind::Ortho),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle status. Transitions are monotonic:
/// pending -> processing -> {completed | failed | cancelled},
/// with the stale-sweep reset (processing -> pending) as the only
/// crash-recovery exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses are immutable apart from retention deletion.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn allows(&self, to: JobStatus) -> bool {
        match self {
            JobStatus::Pending => matches!(
                to,
                JobStatus::Processing | JobStatus::Cancelled
            ),
            // processing -> pending only via the stale sweep
            JobStatus::Processing => matches!(
                to,
                JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Pending
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job Entity - one queued unit of pipeline work tied to a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_id: String,
    pub kind: JobKind,
    pub status: JobStatus,

    // Observability fields, last-write-wins
    pub current_step: Option<String>,
    pub progress_message: Option<String>,
    pub error_message: Option<String>,

    /// Sticky cancellation flag: set exactly once, never reset.
    pub cancelled: bool,

    /// Remote scratch blob key of the uploaded input (e.g. jobs/<id>.laz).
    pub source_key: Option<String>,
    /// Transient local working path staged by the submitting API.
    pub local_path: Option<String>,

    /// Reserved for external retry controllers; the engine never increments.
    pub retry_count: i32,

    pub created_at: i64, // epoch ms
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Job {
    /// Create a new pending job.
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `project_id` - Owning project
    /// * `kind` - Pipeline selector
    /// * `source_key` - Remote scratch key of the input artifact
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        project_id: impl Into<String>,
        kind: JobKind,
        source_key: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            kind,
            status: JobStatus::Pending,
            current_step: None,
            progress_message: None,
            error_message: None,
            cancelled: false,
            source_key,
            local_path: None,
            retry_count: 0,
            created_at,
            updated_at: created_at,
            completed_at: None,
        }
    }

    /// Guarded status transition. The store-level writes are authoritative
    /// in production; this guard backs the in-memory store and tests.
    pub fn transition(&mut self, to: JobStatus, now_millis: i64) -> super::error::Result<()> {
        if !self.status.allows(to) {
            return Err(super::error::DomainError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = now_millis;
        if to.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now_millis);
        }
        Ok(())
    }

    /// Create a test job with deterministic ID and timestamp (tests only).
    ///
    /// Uses a simple counter for deterministic IDs (job-1, job-2, ...);
    /// timestamps start at 1000 and increment by 1000.
    pub fn new_test(project_id: impl Into<String>, kind: JobKind) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("job-{}", counter);
        let created_at = (counter * 1000) as i64;
        Self::new(id, created_at, project_id, kind, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_job_starts_clean() {
        let job = Job::new("j1", 42, "PROJ-1", JobKind::PointCloud, None);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.cancelled);
        assert_eq!(job.updated_at, 42);
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn status_moves_forward_only() {
        let mut job = Job::new_test("PROJ-1", JobKind::Ortho);
        job.transition(JobStatus::Processing, 10).unwrap();
        job.transition(JobStatus::Completed, 20).unwrap();
        assert_eq!(job.completed_at, Some(20));

        // Terminal statuses are immutable
        let err = job.transition(JobStatus::Processing, 30);
        assert!(err.is_err());
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn pending_cannot_complete_directly() {
        let mut job = Job::new_test("PROJ-1", JobKind::PointCloud);
        assert!(job.transition(JobStatus::Completed, 10).is_err());
        assert!(job.transition(JobStatus::Cancelled, 10).is_ok());
    }

    #[test]
    fn stale_sweep_transition_is_allowed() {
        assert!(JobStatus::Processing.allows(JobStatus::Pending));
        assert!(!JobStatus::Pending.allows(JobStatus::Pending));
        assert!(!JobStatus::Cancelled.allows(JobStatus::Pending));
    }

    #[test]
    fn kind_and_status_round_trip() {
        assert_eq!(JobKind::parse("ortho"), Some(JobKind::Ortho));
        assert_eq!(JobKind::parse("bogus"), None);
        assert_eq!(JobStatus::parse("processing"), Some(JobStatus::Processing));
        assert_eq!(JobStatus::Cancelled.to_string(), "cancelled");
    }
}
