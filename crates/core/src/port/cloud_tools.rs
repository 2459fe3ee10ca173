// Point-Cloud Toolchain Port
// Black-box collaborators for the point-cloud pipeline: a bounded
// metadata probe, a preview renderer and the external format converter.

use crate::domain::Location;
use crate::port::tool::ToolError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Metadata extracted from a point-cloud artifact without loading it
/// into memory (header/streaming read only).
#[derive(Debug, Clone, PartialEq)]
pub struct CloudSummary {
    pub point_count: u64,
    /// Mean/bbox center in WGS84; absent when no projection is known
    /// or the transform fails.
    pub center: Option<Location>,
}

#[async_trait]
pub trait CloudTools: Send + Sync {
    /// Probe point count and spatial center. Must bound memory on
    /// arbitrarily large inputs.
    async fn summarize(
        &self,
        input: &Path,
        proj4: Option<&str>,
    ) -> std::result::Result<CloudSummary, ToolError>;

    /// Render a preview image (512 px wide). Callers treat failure here
    /// as non-fatal.
    async fn render_preview(
        &self,
        input: &Path,
        out_png: &Path,
    ) -> std::result::Result<(), ToolError>;

    /// Run the external converter; produces a directory tree under
    /// `out_dir` and returns the entry artifact path relative to it.
    async fn convert(
        &self,
        input: &Path,
        out_dir: &Path,
        proj4: &str,
    ) -> std::result::Result<PathBuf, ToolError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::{Arc, Mutex};

    /// Async hook invoked after every mock call, keyed by method name.
    /// Lets tests inject cancellation between pipeline steps.
    pub type CallHook = Arc<dyn Fn(&'static str) -> BoxFuture<'static, ()> + Send + Sync>;

    pub struct MockCloudTools {
        summary: CloudSummary,
        preview_stderr: Option<String>,
        convert_stderr: Option<String>,
        hook: Option<CallHook>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl MockCloudTools {
        pub fn new() -> Self {
            Self {
                summary: CloudSummary {
                    point_count: 1_000,
                    center: Some(Location {
                        lat: 41.5,
                        lon: -87.9,
                        z: 180.0,
                    }),
                },
                preview_stderr: None,
                convert_stderr: None,
                hook: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_summary(mut self, summary: CloudSummary) -> Self {
            self.summary = summary;
            self
        }

        /// Preview renderer fails with this stderr (non-fatal path).
        pub fn with_preview_failure(mut self, stderr: impl Into<String>) -> Self {
            self.preview_stderr = Some(stderr.into());
            self
        }

        /// Converter exits non-zero with this stderr (hard failure path).
        pub fn with_convert_failure(mut self, stderr: impl Into<String>) -> Self {
            self.convert_stderr = Some(stderr.into());
            self
        }

        pub fn with_hook(mut self, hook: CallHook) -> Self {
            self.hook = Some(hook);
            self
        }

        pub fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }

        async fn record(&self, method: &'static str) {
            self.calls.lock().unwrap().push(method);
            if let Some(hook) = &self.hook {
                hook(method).await;
            }
        }
    }

    impl Default for MockCloudTools {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl CloudTools for MockCloudTools {
        async fn summarize(
            &self,
            _input: &Path,
            _proj4: Option<&str>,
        ) -> std::result::Result<CloudSummary, ToolError> {
            self.record("summarize").await;
            Ok(self.summary.clone())
        }

        async fn render_preview(
            &self,
            _input: &Path,
            out_png: &Path,
        ) -> std::result::Result<(), ToolError> {
            self.record("render_preview").await;
            if let Some(stderr) = &self.preview_stderr {
                return Err(ToolError::ExitFailure {
                    program: "preview".into(),
                    code: Some(1),
                    stderr: stderr.clone(),
                });
            }
            std::fs::write(out_png, b"png").map_err(|e| ToolError::Io {
                program: "preview".into(),
                message: e.to_string(),
            })?;
            Ok(())
        }

        async fn convert(
            &self,
            _input: &Path,
            out_dir: &Path,
            _proj4: &str,
        ) -> std::result::Result<PathBuf, ToolError> {
            self.record("convert").await;
            if let Some(stderr) = &self.convert_stderr {
                return Err(ToolError::ExitFailure {
                    program: "converter".into(),
                    code: Some(1),
                    stderr: stderr.clone(),
                });
            }
            // Produce a minimal output tree like the real converter
            let io = |e: std::io::Error| ToolError::Io {
                program: "converter".into(),
                message: e.to_string(),
            };
            std::fs::create_dir_all(out_dir.join("octree")).map_err(io)?;
            std::fs::write(out_dir.join("metadata.json"), b"{}").map_err(io)?;
            std::fs::write(out_dir.join("octree/r0.bin"), b"bin").map_err(io)?;
            Ok(PathBuf::from("metadata.json"))
        }
    }
}
