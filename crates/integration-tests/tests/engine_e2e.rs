//! End-to-end scenarios: real SQLite store and filesystem blob store,
//! external tools mocked, jobs driven through the worker loop.

use std::sync::Arc;
use std::time::Duration;
use terraflow_core::application::{
    shutdown_channel, JobService, PipelineRunner, SubmitRequest, Worker, WorkerConfig,
};
use terraflow_core::domain::{Crs, Job, JobKind, JobStatus, Project};
use terraflow_core::port::cloud_tools::mocks::{CallHook, MockCloudTools};
use terraflow_core::port::id_provider::UuidProvider;
use terraflow_core::port::raster_tools::mocks::MockRasterTools;
use terraflow_core::port::time_provider::SystemTimeProvider;
use terraflow_core::port::{BlobStore, CloudTools, JobStore, ProjectStore, RasterTools};
use terraflow_infra_sqlite::{create_pool, run_migrations, SqliteJobStore, SqliteProjectStore};
use terraflow_infra_storage::FsBlobStore;

struct Harness {
    dir: tempfile::TempDir,
    jobs: Arc<SqliteJobStore>,
    projects: Arc<SqliteProjectStore>,
    blobs: Arc<FsBlobStore>,
    service: JobService,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&dir.path().join("meta.db").to_string_lossy())
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();

        let time = Arc::new(SystemTimeProvider);
        let jobs = Arc::new(SqliteJobStore::new(pool.clone(), time.clone()));
        let projects = Arc::new(SqliteProjectStore::new(pool, time.clone()));
        let blobs = Arc::new(
            FsBlobStore::new(dir.path().join("blobs"), "https://blobs.test").unwrap(),
        );
        let service = JobService::new(jobs.clone(), Arc::new(UuidProvider), time);

        Self {
            dir,
            jobs,
            projects,
            blobs,
            service,
        }
    }

    async fn seed_project(&self, id: &str) {
        let mut project = Project::new(id);
        project.crs = Some(Crs {
            epsg: Some("26916".into()),
            name: None,
            proj4: Some("+proj=utm +zone=16 +datum=NAD83".into()),
        });
        self.projects.upsert(&project).await.unwrap();
    }

    fn worker(&self, cloud: Arc<dyn CloudTools>, raster: Arc<dyn RasterTools>) -> Worker {
        let pipeline = Arc::new(PipelineRunner::new(
            self.jobs.clone(),
            self.projects.clone(),
            self.blobs.clone(),
            cloud,
            raster,
            Arc::new(SystemTimeProvider),
            self.dir.path().join("work"),
        ));
        Worker::new(
            self.jobs.clone(),
            pipeline,
            Arc::new(SystemTimeProvider),
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                ..WorkerConfig::default()
            },
        )
    }

    /// Stage a point-cloud input (local working file + remote scratch
    /// blob) and submit the job, as the API layer would.
    async fn submit_cloud_job(&self, job_id: &str, project_id: &str) -> String {
        let local = self.dir.path().join(format!("{}.laz", job_id));
        std::fs::write(&local, b"points").unwrap();

        let staged = self.dir.path().join(format!("{}_upload.laz", job_id));
        std::fs::write(&staged, b"points").unwrap();
        let source_key = format!("jobs/{}.laz", job_id);
        self.blobs.upload(&staged, &source_key, None).await.unwrap();

        self.service
            .submit(SubmitRequest {
                project_id: project_id.to_string(),
                kind: JobKind::PointCloud,
                source_key: Some(source_key),
                local_path: Some(local.to_string_lossy().into_owned()),
                job_id: Some(job_id.to_string()),
            })
            .await
            .unwrap()
    }

    async fn submit_ortho_job(&self, job_id: &str, project_id: &str) -> String {
        let staged = self.dir.path().join(format!("{}_upload.tif", job_id));
        std::fs::write(&staged, b"raster").unwrap();
        let source_key = format!("jobs/{}.tif", job_id);
        self.blobs.upload(&staged, &source_key, None).await.unwrap();

        self.service
            .submit(SubmitRequest {
                project_id: project_id.to_string(),
                kind: JobKind::Ortho,
                source_key: Some(source_key),
                local_path: None,
                job_id: Some(job_id.to_string()),
            })
            .await
            .unwrap()
    }

    /// Run the worker until the job reaches a terminal status.
    async fn run_to_terminal(&self, worker: Worker, job_id: &str) -> Job {
        let (shutdown_tx, shutdown_rx) = shutdown_channel();
        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        let job = loop {
            let job = self
                .jobs
                .find_by_id(&job_id.to_string())
                .await
                .unwrap()
                .unwrap();
            if job.status.is_terminal() {
                break job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} never reached a terminal status (status: {})",
                job_id,
                job.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        shutdown_tx.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .unwrap()
            .unwrap();
        job
    }

    async fn project(&self, id: &str) -> Project {
        self.projects.get(id).await.unwrap().unwrap()
    }

    fn work_dir_is_clean(&self) -> bool {
        match std::fs::read_dir(self.dir.path().join("work")) {
            Ok(entries) => entries.count() == 0,
            Err(_) => true, // never created
        }
    }
}

#[tokio::test]
async fn scenario_a_point_cloud_job_completes_end_to_end() {
    let hx = Harness::new().await;
    hx.seed_project("PROJ-A").await;
    let job_id = hx.submit_cloud_job("job-a", "PROJ-A").await;
    let local_input = hx.dir.path().join("job-a.laz");

    let worker = hx.worker(
        Arc::new(MockCloudTools::new()),
        Arc::new(MockRasterTools::new()),
    );
    let job = hx.run_to_terminal(worker, &job_id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());
    assert!(job.error_message.is_none());

    let project = hx.project("PROJ-A").await;
    assert_eq!(
        project.cloud_url.as_deref(),
        Some("https://blobs.test/PROJ-A/metadata.json")
    );
    assert!(project.thumbnail_url.is_some());
    assert_eq!(project.point_count, Some(1_000));

    let keys = hx.blobs.list("PROJ-A/").await.unwrap();
    assert!(keys.contains(&"PROJ-A/metadata.json".to_string()));
    assert!(keys.contains(&"PROJ-A/octree/r0.bin".to_string()));
    assert!(keys.contains(&"PROJ-A/thumbnail.png".to_string()));

    // Scratch artifacts are gone: remote source, local input, run dirs
    assert!(hx.blobs.list("jobs/").await.unwrap().is_empty());
    assert!(!local_input.exists());
    assert!(hx.work_dir_is_clean());
}

#[tokio::test]
async fn scenario_b_cancellation_mid_run_cleans_up_and_leaves_parent_untouched() {
    let hx = Harness::new().await;
    hx.seed_project("PROJ-B").await;
    let job_id = hx.submit_cloud_job("job-b", "PROJ-B").await;
    let local_input = hx.dir.path().join("job-b.laz");

    // Cancel arrives after step 1 (metadata) and before step 2
    let jobs_for_hook = hx.jobs.clone();
    let hook: CallHook = Arc::new(move |method| {
        let jobs = jobs_for_hook.clone();
        Box::pin(async move {
            if method == "summarize" {
                use terraflow_core::port::time_provider::TimeProvider;
                let now = SystemTimeProvider.now_millis();
                jobs.cancel(&"job-b".to_string(), now).await.unwrap();
            }
        })
    });
    let cloud = Arc::new(MockCloudTools::new().with_hook(hook));

    let worker = hx.worker(cloud.clone(), Arc::new(MockRasterTools::new()));
    let job = hx.run_to_terminal(worker, &job_id).await;

    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.cancelled);
    assert_eq!(cloud.calls(), vec!["summarize"]);

    // Parent resource unmodified
    let project = hx.project("PROJ-B").await;
    assert!(project.point_count.is_none());
    assert!(project.cloud_url.is_none());
    assert!(project.thumbnail_url.is_none());

    // Scratch and partial remote artifacts removed
    assert!(hx.blobs.list("PROJ-B/").await.unwrap().is_empty());
    assert!(hx.blobs.list("jobs/").await.unwrap().is_empty());
    assert!(!local_input.exists());
    assert!(hx.work_dir_is_clean());
}

#[tokio::test]
async fn scenario_c_converter_failure_records_stderr_verbatim() {
    let hx = Harness::new().await;
    hx.seed_project("PROJ-C").await;
    let job_id = hx.submit_cloud_job("job-c", "PROJ-C").await;

    let worker = hx.worker(
        Arc::new(MockCloudTools::new().with_convert_failure("unsupported point format 99")),
        Arc::new(MockRasterTools::new()),
    );
    let job = hx.run_to_terminal(worker, &job_id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let error = job.error_message.unwrap();
    assert!(error.contains("unsupported point format 99"), "{}", error);

    // Parent keeps no derived reference, partial uploads are removed
    let project = hx.project("PROJ-C").await;
    assert!(project.cloud_url.is_none());
    assert!(hx.blobs.list("PROJ-C/").await.unwrap().is_empty());
    assert!(hx.blobs.list("jobs/").await.unwrap().is_empty());
    assert!(hx.work_dir_is_clean());
}

#[tokio::test]
async fn ortho_job_completes_end_to_end() {
    let hx = Harness::new().await;
    hx.seed_project("PROJ-D").await;
    let job_id = hx.submit_ortho_job("job-d", "PROJ-D").await;

    let worker = hx.worker(
        Arc::new(MockCloudTools::new()),
        Arc::new(MockRasterTools::new()),
    );
    let job = hx.run_to_terminal(worker, &job_id).await;

    assert_eq!(job.status, JobStatus::Completed);

    let ortho = hx.project("PROJ-D").await.ortho.unwrap();
    assert_eq!(
        ortho.url.as_deref(),
        Some("https://blobs.test/PROJ-D/ortho/overlay.webp")
    );
    assert!(ortho.thumbnail.is_some());
    assert!(ortho.bounds.is_some());

    let keys = hx.blobs.list("PROJ-D/ortho/").await.unwrap();
    assert_eq!(keys.len(), 2);
    assert!(hx.blobs.list("jobs/").await.unwrap().is_empty());
    assert!(hx.work_dir_is_clean());
}

#[tokio::test]
async fn resubmitting_the_same_job_id_conflicts() {
    let hx = Harness::new().await;
    hx.seed_project("PROJ-E").await;
    hx.submit_cloud_job("job-e", "PROJ-E").await;

    let err = hx
        .service
        .submit(SubmitRequest {
            project_id: "PROJ-E".to_string(),
            kind: JobKind::PointCloud,
            source_key: None,
            local_path: None,
            job_id: Some("job-e".to_string()),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        terraflow_core::error::AppError::Conflict(_)
    ));
}
