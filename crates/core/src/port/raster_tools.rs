// Raster Toolchain Port
// Black-box collaborators for the ortho pipeline: georeference
// validation, overlay conversion with bounds extraction, preview.

use crate::domain::OverlayBounds;
use crate::port::tool::ToolError;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait RasterTools: Send + Sync {
    /// Verify the artifact is a readable georeferenced raster.
    async fn validate(&self, input: &Path) -> std::result::Result<(), ToolError>;

    /// Convert to the web overlay format, returning corner bounds
    /// re-projected into EPSG:4326.
    async fn convert_overlay(
        &self,
        input: &Path,
        out_path: &Path,
    ) -> std::result::Result<OverlayBounds, ToolError>;

    /// Render a preview image (512 px wide). Callers treat failure here
    /// as non-fatal.
    async fn render_preview(
        &self,
        input: &Path,
        out_png: &Path,
    ) -> std::result::Result<(), ToolError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::port::cloud_tools::mocks::CallHook;
    use std::sync::Mutex;

    pub struct MockRasterTools {
        bounds: OverlayBounds,
        validate_stderr: Option<String>,
        convert_stderr: Option<String>,
        preview_stderr: Option<String>,
        hook: Option<CallHook>,
        calls: Mutex<Vec<&'static str>>,
    }

    impl MockRasterTools {
        pub fn new() -> Self {
            Self {
                bounds: OverlayBounds::new(41.5, -87.9, 41.6, -87.8),
                validate_stderr: None,
                convert_stderr: None,
                preview_stderr: None,
                hook: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_bounds(mut self, bounds: OverlayBounds) -> Self {
            self.bounds = bounds;
            self
        }

        pub fn with_validate_failure(mut self, stderr: impl Into<String>) -> Self {
            self.validate_stderr = Some(stderr.into());
            self
        }

        pub fn with_convert_failure(mut self, stderr: impl Into<String>) -> Self {
            self.convert_stderr = Some(stderr.into());
            self
        }

        pub fn with_preview_failure(mut self, stderr: impl Into<String>) -> Self {
            self.preview_stderr = Some(stderr.into());
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

        fn fail(program: &str, stderr: &str) -> ToolError {
            ToolError::ExitFailure {
                program: program.to_string(),
                code: Some(1),
                stderr: stderr.to_string(),
            }
        }
    }

    impl Default for MockRasterTools {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl RasterTools for MockRasterTools {
        async fn validate(&self, _input: &Path) -> std::result::Result<(), ToolError> {
            self.record("validate").await;
            match &self.validate_stderr {
                Some(stderr) => Err(Self::fail("gdalinfo", stderr)),
                None => Ok(()),
            }
        }

        async fn convert_overlay(
            &self,
            _input: &Path,
            out_path: &Path,
        ) -> std::result::Result<OverlayBounds, ToolError> {
            self.record("convert_overlay").await;
            if let Some(stderr) = &self.convert_stderr {
                return Err(Self::fail("gdal_translate", stderr));
            }
            std::fs::write(out_path, b"webp").map_err(|e| ToolError::Io {
                program: "gdal_translate".into(),
                message: e.to_string(),
            })?;
            Ok(self.bounds)
        }

        async fn render_preview(
            &self,
            _input: &Path,
            out_png: &Path,
        ) -> std::result::Result<(), ToolError> {
            self.record("render_preview").await;
            if let Some(stderr) = &self.preview_stderr {
                return Err(Self::fail("gdal_translate", stderr));
            }
            std::fs::write(out_png, b"png").map_err(|e| ToolError::Io {
                program: "gdal_translate".into(),
                message: e.to_string(),
            })?;
            Ok(())
        }
    }
}
