// Ortho Overlay Conversion Sequence
// download (+ sidecar probe) -> validate -> overlay conversion with
// bounds -> preview (non-fatal) -> upload -> persist overlay reference.

use super::{PipelineRunner, Scratch, StepError};
use crate::domain::{Job, OrthoOverlay};
use std::path::Path;
use tracing::{debug, info, warn};

/// World-file style sidecars probed next to the source artifact.
const SIDECAR_EXTENSIONS: &[&str] = &["tfw", "jgw", "pgw", "wld"];

fn key_extension(key: &str) -> &str {
    Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("tif")
}

fn key_with_extension(key: &str, ext: &str) -> String {
    match key.rfind('.') {
        Some(dot) => format!("{}.{}", &key[..dot], ext),
        None => format!("{}.{}", key, ext),
    }
}

impl PipelineRunner {
    pub(super) async fn run_ortho(
        &self,
        job: &Job,
        scratch: &mut Scratch,
    ) -> Result<(), StepError> {
        let source_key = job.source_key.clone().ok_or_else(|| {
            StepError::Failed("job has no source artifact reference".to_string())
        })?;
        scratch.track_remote_key(&source_key);

        let run_dir = self.create_run_dir(&format!("ortho_{}_", job.id), scratch)?;

        // Parent resource is read once before step 1
        let mut project = self
            .projects
            .get(&job.project_id)
            .await?
            .ok_or_else(|| StepError::Failed(format!("project {} not found", job.project_id)))?;

        // Step 1: download the source artifact plus optional sidecars
        self.checkpoint(&job.id).await?;
        self.progress(&job.id, "download", "Downloading source raster...")
            .await;
        let input = run_dir.join(format!("{}.{}", job.id, key_extension(&source_key)));
        self.blobs.download(&source_key, &input).await?;
        info!(job_id = %job.id, key = %source_key, "Source raster staged");

        for ext in SIDECAR_EXTENSIONS {
            let sidecar_key = key_with_extension(&source_key, ext);
            scratch.track_remote_key(&sidecar_key);
            let sidecar_local = input.with_extension(ext);
            match self.blobs.download(&sidecar_key, &sidecar_local).await {
                Ok(()) => info!(job_id = %job.id, key = %sidecar_key, "Sidecar staged"),
                Err(_) => debug!(job_id = %job.id, key = %sidecar_key, "No sidecar found"),
            }
        }

        // Step 2: validate the raster is georeferenced and readable
        self.checkpoint(&job.id).await?;
        self.progress(&job.id, "validate", "Validating georeferenced raster...")
            .await;
        self.raster_tools.validate(&input).await?;

        // Step 3: convert to the overlay format, extracting WGS84 bounds
        self.checkpoint(&job.id).await?;
        self.progress(&job.id, "conversion", "Converting raster to web overlay...")
            .await;
        let overlay = run_dir.join("overlay.webp");
        let bounds = self.raster_tools.convert_overlay(&input, &overlay).await?;
        info!(
            job_id = %job.id,
            south = bounds.south(),
            west = bounds.west(),
            north = bounds.north(),
            east = bounds.east(),
            "Overlay converted"
        );

        // Step 4: preview image (absence must never fail the job)
        self.checkpoint(&job.id).await?;
        self.progress(&job.id, "thumbnail", "Generating preview image...")
            .await;
        let preview = run_dir.join("preview.png");
        let preview_ok = match self.raster_tools.render_preview(&overlay, &preview).await {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Preview generation failed; continuing");
                false
            }
        };

        // Step 5: upload overlay + preview
        self.checkpoint(&job.id).await?;
        self.progress(&job.id, "upload", "Uploading overlay files...")
            .await;
        let prefix = format!("{}/ortho/", project.id);
        scratch.track_remote_prefix(&prefix);
        let overlay_key = format!("{}overlay.webp", prefix);
        self.blobs
            .upload(&overlay, &overlay_key, Some("image/webp"))
            .await?;
        let thumbnail_url = if preview_ok {
            let preview_key = format!("{}preview.png", prefix);
            match self.blobs.upload(&preview, &preview_key, Some("image/png")).await {
                Ok(()) => Some(self.blobs.url(&preview_key)),
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Preview upload failed; continuing");
                    None
                }
            }
        } else {
            None
        };

        // Step 6: persist overlay reference, preview reference and bounds
        self.checkpoint(&job.id).await?;
        project.ortho = Some(OrthoOverlay {
            url: Some(self.blobs.url(&overlay_key)),
            thumbnail: thumbnail_url,
            bounds: Some(bounds),
        });
        self.projects.upsert(&project).await?;
        info!(job_id = %job.id, "Project updated with overlay reference");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_extension_defaults_to_tif() {
        assert_eq!(key_extension("jobs/abc.tiff"), "tiff");
        assert_eq!(key_extension("jobs/abc"), "tif");
    }

    #[test]
    fn sidecar_key_replaces_extension() {
        assert_eq!(key_with_extension("jobs/abc.tif", "tfw"), "jobs/abc.tfw");
        assert_eq!(key_with_extension("jobs/abc", "wld"), "jobs/abc.wld");
    }
}
