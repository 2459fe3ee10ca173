// Worker - Scheduler Loop
// Polls the job store, dispatches one job at a time to the pipeline
// executor, and runs the retention sweep on a fixed cadence. The loop
// never dies on a store error.

pub mod constants;
mod shutdown;

pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::pipeline::PipelineRunner;
use crate::domain::{Job, JobStatus};
use crate::error::Result;
use crate::port::{JobPatch, JobStore, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub retention_max_age: Duration,
    pub sweep_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: constants::DEFAULT_POLL_INTERVAL,
            retention_max_age: constants::DEFAULT_RETENTION_MAX_AGE,
            sweep_interval: constants::DEFAULT_SWEEP_INTERVAL,
        }
    }
}

pub struct Worker {
    jobs: Arc<dyn JobStore>,
    pipeline: Arc<PipelineRunner>,
    time: Arc<dyn TimeProvider>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        pipeline: Arc<PipelineRunner>,
        time: Arc<dyn TimeProvider>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            jobs,
            pipeline,
            time,
            config,
        }
    }

    /// Run the scheduler loop with graceful shutdown support.
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        info!("Worker started");

        // Crash recovery: a processing row with no live owner is an
        // orphan from a crashed worker; restart it from step 1.
        match self.jobs.reset_stale_processing().await {
            Ok(0) => {}
            Ok(reset) => info!(reset = reset, "Stale processing jobs returned to the queue"),
            Err(e) => error!(error = %e, "Stale-job sweep failed"),
        }

        let mut last_sweep: Option<i64> = None;
        loop {
            if shutdown.is_shutdown() {
                info!("Worker shutting down");
                break;
            }

            self.maybe_sweep(&mut last_sweep).await;

            match self.jobs.claim_next().await {
                Ok(Some(job)) => {
                    info!(job_id = %job.id, kind = %job.kind, "Claimed job");
                    self.dispatch(job).await;
                    // Opportunistic sweep after each completed job
                    self.maybe_sweep(&mut last_sweep).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = sleep(self.config.poll_interval) => {},
                        _ = shutdown.wait() => {
                            info!("Worker interrupted during idle");
                            break;
                        }
                    }
                }
                Err(e) => {
                    // Store unavailable: log and retry after the poll interval
                    error!(error = %e, "Failed to claim next job");
                    tokio::select! {
                        _ = sleep(self.config.poll_interval) => {},
                        _ = shutdown.wait() => {
                            info!("Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }

        info!("Worker stopped");
        Ok(())
    }

    /// Run one pipeline inside a spawned task so a panicking step cannot
    /// take down the scheduler loop.
    async fn dispatch(&self, job: Job) {
        let pipeline = Arc::clone(&self.pipeline);
        let job_id = job.id.clone();

        let handle = tokio::task::spawn(async move { pipeline.run(job).await });

        if let Err(join_err) = handle.await {
            error!(job_id = %job_id, error = %join_err, "Pipeline run panicked");
            let now = self.time.now_millis();
            let patch = JobPatch::terminal(JobStatus::Failed, now)
                .with_error("internal error: pipeline run panicked");
            if let Err(e) = self.jobs.update(&job_id, patch).await {
                error!(job_id = %job_id, error = %e, "Failed to mark panicked job failed");
            }
        }
    }

    /// Retention sweep, gated by a last-run timestamp. The first pass
    /// always runs; a failed sweep still advances the gate so a broken
    /// store cannot turn the loop into a delete storm.
    async fn maybe_sweep(&self, last_sweep: &mut Option<i64>) {
        let now = self.time.now_millis();
        let interval_ms = self.config.sweep_interval.as_millis() as i64;
        let due = match *last_sweep {
            None => true,
            Some(at) => now - at >= interval_ms,
        };
        if !due {
            return;
        }

        let cutoff = now - self.config.retention_max_age.as_millis() as i64;
        match self.jobs.delete_older_than(cutoff).await {
            Ok(0) => debug!("Retention sweep: nothing expired"),
            Ok(deleted) => info!(deleted = deleted, "Retention sweep removed expired jobs"),
            Err(e) => error!(error = %e, "Retention sweep failed"),
        }
        *last_sweep = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Job, JobKind, Project};
    use crate::port::blob_store::mocks::MemoryBlobStore;
    use crate::port::cloud_tools::mocks::MockCloudTools;
    use crate::port::job_store::mocks::MemoryJobStore;
    use crate::port::project_store::mocks::MemoryProjectStore;
    use crate::port::raster_tools::mocks::MockRasterTools;
    use crate::port::time_provider::SystemTimeProvider;

    fn test_worker(jobs: Arc<MemoryJobStore>) -> (Worker, tempfile::TempDir) {
        let work = tempfile::tempdir().unwrap();
        let blobs = Arc::new(MemoryBlobStore::new());
        let projects = Arc::new(MemoryProjectStore::with_project(Project::new("PROJ-W")));
        let pipeline = Arc::new(PipelineRunner::new(
            jobs.clone(),
            projects,
            blobs,
            Arc::new(MockCloudTools::new()),
            Arc::new(MockRasterTools::new()),
            Arc::new(SystemTimeProvider),
            work.path().join("runs"),
        ));
        let config = WorkerConfig {
            poll_interval: Duration::from_millis(10),
            ..WorkerConfig::default()
        };
        let worker = Worker::new(jobs, pipeline, Arc::new(SystemTimeProvider), config);
        (worker, work)
    }

    #[tokio::test]
    async fn worker_resets_stale_jobs_and_processes_the_queue() {
        let jobs = Arc::new(MemoryJobStore::new(Arc::new(SystemTimeProvider)));

        // Simulate a crash: a job stuck in processing
        let stale = Job::new("stale", 1_000, "PROJ-W", JobKind::Ortho, None);
        jobs.insert(&stale).await.unwrap();
        let claimed = jobs.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, "stale");

        let (worker, _work) = test_worker(jobs.clone());
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let jobs_for_wait = jobs.clone();

        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

        // The stale job goes back to pending and is then re-claimed and
        // driven to a terminal status (failed: no source artifact).
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = jobs_for_wait
                .find_by_id(&"stale".to_string())
                .await
                .unwrap()
                .unwrap();
            if job.status.is_terminal() {
                assert_eq!(job.status, JobStatus::Failed);
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job never reached a terminal status"
            );
            sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn worker_stops_promptly_when_idle() {
        let jobs = Arc::new(MemoryJobStore::new(Arc::new(SystemTimeProvider)));
        let (worker, _work) = test_worker(jobs);
        let (shutdown_tx, shutdown_rx) = shutdown_channel();

        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });
        sleep(Duration::from_millis(30)).await;
        shutdown_tx.shutdown();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn retention_sweep_honors_the_gate() {
        use crate::port::time_provider::mocks::FixedTimeProvider;

        let time = Arc::new(FixedTimeProvider::new(1_000_000_000));
        let jobs = Arc::new(MemoryJobStore::new(time.clone()));

        // One ancient record, one fresh
        let old = Job::new("old", 0, "PROJ-W", JobKind::Ortho, None);
        let fresh = Job::new("fresh", 999_999_999, "PROJ-W", JobKind::Ortho, None);
        jobs.insert(&old).await.unwrap();
        jobs.insert(&fresh).await.unwrap();

        let (worker, _work) = test_worker(jobs.clone());
        let worker = Worker {
            time: time.clone(),
            config: WorkerConfig {
                retention_max_age: Duration::from_millis(500_000_000),
                ..worker.config.clone()
            },
            ..worker
        };

        let mut last_sweep = None;
        worker.maybe_sweep(&mut last_sweep).await;
        assert!(last_sweep.is_some());
        assert!(jobs.find_by_id(&"old".to_string()).await.unwrap().is_none());
        assert!(jobs
            .find_by_id(&"fresh".to_string())
            .await
            .unwrap()
            .is_some());

        // Within the gate interval nothing runs again
        let before = last_sweep;
        worker.maybe_sweep(&mut last_sweep).await;
        assert_eq!(before, last_sweep);
    }
}
