// Raster Toolchain (GDAL CLI)
// Validation and bounds come from `gdalinfo -json`; the overlay and
// preview are produced by `gdal_translate`.

use crate::runner::{require_success, run_tool};
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use terraflow_core::domain::OverlayBounds;
use terraflow_core::port::{RasterTools, ToolCommand, ToolError};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RasterToolsConfig {
    pub gdalinfo_bin: PathBuf,
    pub gdal_translate_bin: PathBuf,
    /// Overlay output width as a percentage of the source width.
    pub downsample_percent: u8,
    pub webp_quality: u8,
    pub validate_timeout: Duration,
    pub convert_timeout: Duration,
    pub preview_timeout: Duration,
}

impl Default for RasterToolsConfig {
    fn default() -> Self {
        Self {
            gdalinfo_bin: PathBuf::from("gdalinfo"),
            gdal_translate_bin: PathBuf::from("gdal_translate"),
            downsample_percent: 50,
            webp_quality: 90,
            validate_timeout: Duration::from_secs(60),
            convert_timeout: Duration::from_secs(30 * 60),
            preview_timeout: Duration::from_secs(30),
        }
    }
}

pub struct GdalRasterTools {
    config: RasterToolsConfig,
}

impl GdalRasterTools {
    pub fn new(config: RasterToolsConfig) -> Self {
        Self { config }
    }

    async fn raster_info(&self, input: &Path) -> Result<Value, ToolError> {
        let program = self.config.gdalinfo_bin.to_string_lossy().into_owned();
        let cmd = ToolCommand::new(program.as_str(), self.config.validate_timeout)
            .arg("-json")
            .arg(input.to_string_lossy());

        let output = require_success(&program, run_tool(&cmd).await?)?;
        serde_json::from_str(&output.stdout).map_err(|e| ToolError::BadOutput {
            program,
            message: format!("unparsable gdalinfo output: {}", e),
        })
    }
}

#[async_trait]
impl RasterTools for GdalRasterTools {
    async fn validate(&self, input: &Path) -> Result<(), ToolError> {
        let info = self.raster_info(input).await?;
        if info.get("cornerCoordinates").is_none() {
            return Err(ToolError::BadOutput {
                program: self.config.gdalinfo_bin.to_string_lossy().into_owned(),
                message: "raster has no georeferencing".to_string(),
            });
        }
        debug!(input = %input.display(), "Raster validated");
        Ok(())
    }

    async fn convert_overlay(
        &self,
        input: &Path,
        out_path: &Path,
    ) -> Result<OverlayBounds, ToolError> {
        let info = self.raster_info(input).await?;
        let bounds = wgs84_bounds(&info).ok_or_else(|| ToolError::BadOutput {
            program: self.config.gdalinfo_bin.to_string_lossy().into_owned(),
            message: "raster has no usable WGS84 extent".to_string(),
        })?;

        let program = self.config.gdal_translate_bin.to_string_lossy().into_owned();
        let mut cmd = ToolCommand::new(program.as_str(), self.config.convert_timeout)
            .args([
                "-of".to_string(),
                "WEBP".to_string(),
                "-outsize".to_string(),
                format!("{}%", self.config.downsample_percent),
                "0".to_string(),
                "-co".to_string(),
                format!("QUALITY={}", self.config.webp_quality),
                "-co".to_string(),
                "LOSSLESS=NO".to_string(),
            ]);

        // Carve transparency from the nodata mask unless the source
        // already carries an alpha band
        if !has_alpha_band(&info) && nodata_value(&info).is_some() {
            cmd = cmd.args(["-b", "1", "-b", "2", "-b", "3", "-b", "mask"]);
        }

        let cmd = cmd
            .arg(input.to_string_lossy())
            .arg(out_path.to_string_lossy());
        require_success(&program, run_tool(&cmd).await?)?;

        if !out_path.is_file() {
            return Err(ToolError::BadOutput {
                program,
                message: "overlay file was not created".to_string(),
            });
        }

        info!(
            input = %input.display(),
            south = bounds.south(),
            north = bounds.north(),
            "Overlay converted"
        );
        Ok(bounds)
    }

    async fn render_preview(&self, input: &Path, out_png: &Path) -> Result<(), ToolError> {
        let program = self.config.gdal_translate_bin.to_string_lossy().into_owned();
        let cmd = ToolCommand::new(program.as_str(), self.config.preview_timeout)
            .args(["-of", "PNG", "-outsize", "512", "0"])
            .arg(input.to_string_lossy())
            .arg(out_png.to_string_lossy());

        require_success(&program, run_tool(&cmd).await?)?;

        if !out_png.is_file() {
            return Err(ToolError::BadOutput {
                program,
                message: "preview image was not created".to_string(),
            });
        }
        Ok(())
    }
}

/// Extract [[south, west], [north, east]] from gdalinfo's wgs84Extent
/// polygon (a GeoJSON ring of [lon, lat] pairs).
fn wgs84_bounds(info: &Value) -> Option<OverlayBounds> {
    let ring = info
        .get("wgs84Extent")?
        .get("coordinates")?
        .as_array()?
        .first()?
        .as_array()?;

    let mut lons = Vec::with_capacity(ring.len());
    let mut lats = Vec::with_capacity(ring.len());
    for pair in ring {
        let pair = pair.as_array()?;
        lons.push(pair.first()?.as_f64()?);
        lats.push(pair.get(1)?.as_f64()?);
    }
    if lons.is_empty() {
        return None;
    }

    let min = |v: &[f64]| v.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = |v: &[f64]| v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    Some(OverlayBounds::new(
        min(&lats),
        min(&lons),
        max(&lats),
        max(&lons),
    ))
}

fn has_alpha_band(info: &Value) -> bool {
    info.get("bands")
        .and_then(Value::as_array)
        .and_then(|bands| bands.last())
        .and_then(|band| band.get("colorInterpretation"))
        .and_then(Value::as_str)
        == Some("Alpha")
}

fn nodata_value(info: &Value) -> Option<f64> {
    info.get("bands")
        .and_then(Value::as_array)
        .and_then(|bands| bands.first())
        .and_then(|band| band.get("noDataValue"))
        .and_then(Value::as_f64)
}
