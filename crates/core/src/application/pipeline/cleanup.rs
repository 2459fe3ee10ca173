// Compensation/Cleanup Handler
// Reverses the partial side effects of an aborted run and finalizes the
// job record. Every action is individually wrapped: one failed deletion
// never blocks the rest, and re-running any of it is harmless.

use super::PipelineRunner;
use crate::domain::{Job, JobStatus};
use crate::port::JobPatch;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Ledger of side effects accumulated during one pipeline run.
///
/// Local paths and remote scratch keys are released on every terminal
/// transition; artifact prefixes (partial uploads under the parent's
/// namespace) are only removed when the run did not complete.
#[derive(Debug, Default)]
pub(crate) struct Scratch {
    locals: Vec<PathBuf>,
    remote_keys: Vec<String>,
    remote_prefixes: Vec<String>,
}

impl Scratch {
    pub fn track_local(&mut self, path: impl Into<PathBuf>) {
        self.locals.push(path.into());
    }

    pub fn track_remote_key(&mut self, key: impl Into<String>) {
        self.remote_keys.push(key.into());
    }

    pub fn track_remote_prefix(&mut self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        if !self.remote_prefixes.contains(&prefix) {
            self.remote_prefixes.push(prefix);
        }
    }
}

impl PipelineRunner {
    /// Successful run: mark completed, then release scratch. Derived
    /// artifacts stay in place.
    pub(super) async fn finish_completed(&self, job: &Job, scratch: &Scratch) {
        let now = self.time.now_millis();
        let patch = JobPatch::terminal(JobStatus::Completed, now)
            .with_step("completed")
            .with_message("Processing completed successfully");
        if let Err(e) = self.jobs.update(&job.id, patch).await {
            error!(job_id = %job.id, error = %e, "Failed to mark job completed");
        }
        info!(job_id = %job.id, "Pipeline run completed");

        self.release_scratch(job, scratch).await;
    }

    /// Cancelled run: remove partial uploads and scratch, then write the
    /// terminal record. The user-facing cancel already set the status
    /// atomically, so the store treats the redundant write as a no-op.
    pub(super) async fn finish_cancelled(&self, job: &Job, scratch: &Scratch) {
        info!(job_id = %job.id, "Handling cancellation");

        self.remove_partial_artifacts(job, scratch).await;
        self.release_scratch(job, scratch).await;

        let now = self.time.now_millis();
        let patch = JobPatch::terminal(JobStatus::Cancelled, now)
            .with_message("Job cancelled by user");
        if let Err(e) = self.jobs.update(&job.id, patch).await {
            error!(job_id = %job.id, error = %e, "Failed to finalize cancelled job");
        }
        info!(job_id = %job.id, "Cancellation handling completed");
    }

    /// Failed run: same compensation as cancellation, but the terminal
    /// record carries the cause verbatim.
    pub(super) async fn finish_failed(&self, job: &Job, cause: &str, scratch: &Scratch) {
        error!(job_id = %job.id, cause = %cause, "Pipeline run failed");

        self.remove_partial_artifacts(job, scratch).await;
        self.release_scratch(job, scratch).await;

        let now = self.time.now_millis();
        let patch = JobPatch::terminal(JobStatus::Failed, now)
            .with_message("Processing failed")
            .with_error(cause);
        if let Err(e) = self.jobs.update(&job.id, patch).await {
            error!(job_id = %job.id, error = %e, "Failed to mark job failed");
        }
    }

    /// Delete transient local files/directories and remote scratch blobs.
    async fn release_scratch(&self, job: &Job, scratch: &Scratch) {
        for path in &scratch.locals {
            let result = if path.is_dir() {
                tokio::fs::remove_dir_all(path).await
            } else if path.exists() {
                tokio::fs::remove_file(path).await
            } else {
                continue;
            };
            match result {
                Ok(()) => debug!(job_id = %job.id, path = %path.display(), "Deleted local scratch"),
                Err(e) => {
                    warn!(job_id = %job.id, path = %path.display(), error = %e, "Failed to delete local scratch")
                }
            }
        }

        for key in &scratch.remote_keys {
            match self.blobs.delete(key).await {
                Ok(()) => debug!(job_id = %job.id, key = %key, "Deleted remote scratch blob"),
                Err(e) => {
                    warn!(job_id = %job.id, key = %key, error = %e, "Failed to delete remote scratch blob")
                }
            }
        }
    }

    /// Delete partially-uploaded derived artifacts under the parent's
    /// namespace (only the prefixes this run uploaded under).
    async fn remove_partial_artifacts(&self, job: &Job, scratch: &Scratch) {
        for prefix in &scratch.remote_prefixes {
            match self.blobs.delete_prefix(prefix).await {
                Ok(0) => {}
                Ok(n) => {
                    info!(job_id = %job.id, prefix = %prefix, deleted = n, "Removed partial uploads")
                }
                Err(e) => {
                    warn!(job_id = %job.id, prefix = %prefix, error = %e, "Failed to remove partial uploads")
                }
            }
        }
    }
}
