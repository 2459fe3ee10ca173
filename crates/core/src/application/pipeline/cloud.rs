// Point-Cloud Conversion Sequence
// metadata probe -> preview (non-fatal) -> persist metadata -> external
// converter -> tree upload -> persist access reference.

use super::{PipelineRunner, Scratch, StepError};
use crate::domain::Job;
use std::path::PathBuf;
use tracing::{info, warn};

impl PipelineRunner {
    pub(super) async fn run_point_cloud(
        &self,
        job: &Job,
        scratch: &mut Scratch,
    ) -> Result<(), StepError> {
        let input = PathBuf::from(job.local_path.as_deref().ok_or_else(|| {
            StepError::Failed("job has no local working file".to_string())
        })?);
        scratch.track_local(&input);
        if let Some(key) = &job.source_key {
            scratch.track_remote_key(key);
        }

        let run_dir = self.create_run_dir(&format!("cloud_{}_", job.id), scratch)?;

        // Parent resource is read once before step 1
        let mut project = self
            .projects
            .get(&job.project_id)
            .await?
            .ok_or_else(|| StepError::Failed(format!("project {} not found", job.project_id)))?;

        // Step 1: metadata
        self.checkpoint(&job.id).await?;
        self.progress(&job.id, "metadata", "Extracting point cloud metadata...")
            .await;
        if !input.exists() {
            return Err(StepError::Failed(format!(
                "working file {} is missing",
                input.display()
            )));
        }
        let summary = self.cloud_tools.summarize(&input, project.proj4()).await?;
        info!(job_id = %job.id, points = summary.point_count, "Metadata extracted");
        project.point_count = Some(summary.point_count);
        if let Some(center) = summary.center {
            project.location = Some(center);
        }

        // Step 2: preview image (absence must never fail the job)
        self.checkpoint(&job.id).await?;
        self.progress(&job.id, "thumbnail", "Generating preview image...")
            .await;
        let preview_png = run_dir.join("preview.png");
        match self.cloud_tools.render_preview(&input, &preview_png).await {
            Ok(()) => {
                let key = format!("{}/thumbnail.png", project.id);
                scratch.track_remote_prefix(format!("{}/", project.id));
                match self.blobs.upload(&preview_png, &key, Some("image/png")).await {
                    Ok(()) => project.thumbnail_url = Some(self.blobs.url(&key)),
                    Err(e) => {
                        warn!(job_id = %job.id, error = %e, "Preview upload failed; continuing")
                    }
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Preview generation failed; continuing")
            }
        }

        // Step 3: persist preview + metadata onto the parent
        self.checkpoint(&job.id).await?;
        self.projects.upsert(&project).await?;
        info!(job_id = %job.id, "Project updated with metadata");

        // Step 4: external format conversion
        self.checkpoint(&job.id).await?;
        self.progress(&job.id, "conversion", "Converting point cloud to web format...")
            .await;
        let proj4 = project
            .proj4()
            .ok_or_else(|| {
                StepError::Failed(format!("project {} has no proj4 projection", project.id))
            })?
            .to_string();
        let out_dir = run_dir.join("converted");
        std::fs::create_dir_all(&out_dir)
            .map_err(|e| StepError::Failed(format!("failed to create output dir: {}", e)))?;
        let entry = self.cloud_tools.convert(&input, &out_dir, &proj4).await?;
        info!(job_id = %job.id, "Conversion completed");

        // Step 5: upload the derived tree
        self.checkpoint(&job.id).await?;
        self.progress(&job.id, "upload", "Uploading converted files...")
            .await;
        let prefix = format!("{}/", project.id);
        scratch.track_remote_prefix(&prefix);
        let uploaded = self.blobs.upload_tree(&out_dir, &prefix).await?;
        info!(job_id = %job.id, files = uploaded, "Derived tree uploaded");
        let entry_key = format!("{}{}", prefix, entry.to_string_lossy().replace('\\', "/"));
        let cloud_url = self.blobs.url(&entry_key);

        // Step 6: persist the access reference
        self.checkpoint(&job.id).await?;
        project.cloud_url = Some(cloud_url);
        self.projects.upsert(&project).await?;
        info!(job_id = %job.id, "Project updated with cloud reference");

        Ok(())
    }
}
