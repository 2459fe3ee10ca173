// Pipeline Step Executor
// Runs one claimed job through its kind's fixed step sequence, checking
// the cancellation flag at every step boundary. Every outcome (success,
// cancellation, failure) is resolved here; nothing propagates to the
// scheduler loop.

mod cleanup;
mod cloud;
mod ortho;


pub(crate) use cleanup::Scratch;

use crate::domain::{Job, JobId, JobKind};
use crate::port::{
    BlobStore, CloudTools, JobStore, ProjectStore, RasterTools, TimeProvider, ToolError,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Control-flow signal for one pipeline run. `Cancelled` is not an
/// error condition; `Failed` carries the cause verbatim for the job's
/// `error_message`.
#[derive(Debug)]
pub(crate) enum StepError {
    Cancelled,
    Failed(String),
}

impl From<crate::AppError> for StepError {
    fn from(err: crate::AppError) -> Self {
        StepError::Failed(err.to_string())
    }
}

impl From<ToolError> for StepError {
    fn from(err: ToolError) -> Self {
        StepError::Failed(err.to_string())
    }
}

pub struct PipelineRunner {
    jobs: Arc<dyn JobStore>,
    projects: Arc<dyn ProjectStore>,
    blobs: Arc<dyn BlobStore>,
    cloud_tools: Arc<dyn CloudTools>,
    raster_tools: Arc<dyn RasterTools>,
    time: Arc<dyn TimeProvider>,
    /// Scratch directories for runs are created under this root.
    work_root: PathBuf,
}

impl PipelineRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn JobStore>,
        projects: Arc<dyn ProjectStore>,
        blobs: Arc<dyn BlobStore>,
        cloud_tools: Arc<dyn CloudTools>,
        raster_tools: Arc<dyn RasterTools>,
        time: Arc<dyn TimeProvider>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jobs,
            projects,
            blobs,
            cloud_tools,
            raster_tools,
            time,
            work_root: work_root.into(),
        }
    }

    /// Execute one claimed job to a terminal status. The runner borrows
    /// the job for this run only; it holds no state across runs.
    pub async fn run(&self, job: Job) {
        info!(job_id = %job.id, kind = %job.kind, project_id = %job.project_id, "Starting pipeline run");

        let mut scratch = Scratch::default();
        let outcome = match job.kind {
            JobKind::PointCloud => self.run_point_cloud(&job, &mut scratch).await,
            JobKind::Ortho => self.run_ortho(&job, &mut scratch).await,
        };

        match outcome {
            Ok(()) => self.finish_completed(&job, &scratch).await,
            Err(StepError::Cancelled) => self.finish_cancelled(&job, &scratch).await,
            Err(StepError::Failed(cause)) => self.finish_failed(&job, &cause, &scratch).await,
        }
    }

    /// Cooperative cancellation checkpoint, consulted at the start of a
    /// run and before every step with an external side effect. A store
    /// hiccup here must not abort a healthy run.
    pub(crate) async fn checkpoint(&self, id: &JobId) -> Result<(), StepError> {
        match self.jobs.is_cancelled(id).await {
            Ok(true) => {
                info!(job_id = %id, "Cancellation detected at checkpoint");
                Err(StepError::Cancelled)
            }
            Ok(false) => Ok(()),
            Err(e) => {
                warn!(job_id = %id, error = %e, "Cancellation check failed; continuing");
                Ok(())
            }
        }
    }

    /// Record the step label and progress message. Best-effort: a store
    /// hiccup is logged, the step still runs.
    pub(crate) async fn progress(&self, id: &JobId, step: &str, message: &str) {
        let patch = crate::port::JobPatch::step(step, message);
        if let Err(e) = self.jobs.update(id, patch).await {
            warn!(job_id = %id, step = %step, error = %e, "Failed to record progress");
        }
    }

    /// Create the scratch directory for one run, tracked for deletion
    /// on any terminal transition.
    pub(crate) fn create_run_dir(
        &self,
        prefix: &str,
        scratch: &mut Scratch,
    ) -> Result<PathBuf, StepError> {
        std::fs::create_dir_all(&self.work_root)
            .map_err(|e| StepError::Failed(format!("failed to create work root: {}", e)))?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(&self.work_root)
            .map_err(|e| StepError::Failed(format!("failed to create scratch dir: {}", e)))?
            .into_path();
        scratch.track_local(&dir);
        Ok(dir)
    }
}
