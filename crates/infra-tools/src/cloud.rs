// Point-Cloud Toolchain
// Metadata comes from a bounded LAS/LAZ header read (point count and
// bbox center); the WGS84 transform and the octree conversion are
// delegated to external commands.

use crate::runner::{require_success, run_tool};
use async_trait::async_trait;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use terraflow_core::domain::Location;
use terraflow_core::port::{CloudSummary, CloudTools, ToolCommand, ToolError};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CloudToolsConfig {
    /// External octree converter binary; run from its own directory so
    /// it can resolve its resources.
    pub converter_bin: PathBuf,
    pub gdaltransform_bin: PathBuf,
    /// Optional preview renderer (`<input> <output> --size 512`).
    /// Preview failure is non-fatal upstream, so absence just degrades.
    pub preview_bin: Option<PathBuf>,
    pub convert_timeout: Duration,
    pub transform_timeout: Duration,
    pub preview_timeout: Duration,
}

impl CloudToolsConfig {
    pub fn new(converter_bin: impl Into<PathBuf>) -> Self {
        Self {
            converter_bin: converter_bin.into(),
            gdaltransform_bin: PathBuf::from("gdaltransform"),
            preview_bin: None,
            convert_timeout: Duration::from_secs(60 * 60),
            transform_timeout: Duration::from_secs(30),
            preview_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ExternalCloudTools {
    config: CloudToolsConfig,
}

impl ExternalCloudTools {
    pub fn new(config: CloudToolsConfig) -> Self {
        Self { config }
    }

    async fn transform_to_wgs84(
        &self,
        center: [f64; 3],
        proj4: &str,
    ) -> Result<Location, ToolError> {
        let program = self.config.gdaltransform_bin.to_string_lossy().into_owned();
        let mut cmd = ToolCommand::new(program.as_str(), self.config.transform_timeout)
            .args(["-s_srs", proj4, "-t_srs", "EPSG:4326"]);
        cmd.stdin = Some(format!("{} {} {}\n", center[0], center[1], center[2]));

        let output = require_success(&program, run_tool(&cmd).await?)?;
        let line = output
            .stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| ToolError::BadOutput {
                program: program.clone(),
                message: "empty transform output".to_string(),
            })?;

        let mut parts = line.split_whitespace().map(str::parse::<f64>);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(Ok(lon)), Some(Ok(lat)), z) => Ok(Location {
                lat: round4(lat),
                lon: round4(lon),
                z: round4(z.and_then(|r| r.ok()).unwrap_or(center[2])),
            }),
            _ => Err(ToolError::BadOutput {
                program,
                message: format!("unparsable transform output: {}", line),
            }),
        }
    }
}

#[async_trait]
impl CloudTools for ExternalCloudTools {
    async fn summarize(
        &self,
        input: &Path,
        proj4: Option<&str>,
    ) -> Result<CloudSummary, ToolError> {
        let path = input.to_path_buf();
        let header = tokio::task::spawn_blocking(move || probe_las_header(&path))
            .await
            .map_err(|e| ToolError::Io {
                program: "las-probe".to_string(),
                message: e.to_string(),
            })??;

        info!(points = header.point_count, "Point cloud header probed");

        let center = match proj4 {
            Some(proj4) => match self.transform_to_wgs84(header.center, proj4).await {
                Ok(location) => Some(location),
                Err(e) => {
                    // Center absence only costs the viewer a default
                    // position; it never fails the job.
                    warn!(error = %e, "WGS84 transform failed; omitting center");
                    None
                }
            },
            None => {
                warn!("No projection on project; omitting center");
                None
            }
        };

        Ok(CloudSummary {
            point_count: header.point_count,
            center,
        })
    }

    async fn render_preview(&self, input: &Path, out_png: &Path) -> Result<(), ToolError> {
        let bin = self.config.preview_bin.as_ref().ok_or_else(|| ToolError::Spawn {
            program: "preview".to_string(),
            message: "no preview renderer configured".to_string(),
        })?;
        let program = bin.to_string_lossy().into_owned();

        let cmd = ToolCommand::new(program.as_str(), self.config.preview_timeout)
            .arg(input.to_string_lossy())
            .arg(out_png.to_string_lossy())
            .args(["--size", "512"]);
        require_success(&program, run_tool(&cmd).await?)?;

        if !out_png.is_file() {
            return Err(ToolError::BadOutput {
                program,
                message: "preview image was not created".to_string(),
            });
        }
        Ok(())
    }

    async fn convert(
        &self,
        input: &Path,
        out_dir: &Path,
        proj4: &str,
    ) -> Result<PathBuf, ToolError> {
        let program = self.config.converter_bin.to_string_lossy().into_owned();

        let mut cmd = ToolCommand::new(program.as_str(), self.config.convert_timeout)
            .arg(input.to_string_lossy())
            .args(["-o".to_string(), out_dir.to_string_lossy().into_owned()])
            .arg("--overwrite")
            .args(["--projection", proj4]);
        // The converter resolves its resources/ relative to the binary
        cmd.current_dir = self.config.converter_bin.parent().map(Path::to_path_buf);

        require_success(&program, run_tool(&cmd).await?)?;

        let entry = PathBuf::from("metadata.json");
        if !out_dir.join(&entry).is_file() {
            return Err(ToolError::BadOutput {
                program,
                message: "metadata.json not found in converter output".to_string(),
            });
        }
        Ok(entry)
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

// ---------------------------------------------------------------------------
// LAS/LAZ header probe
// ---------------------------------------------------------------------------

/// Legacy header length (LAS 1.0 - 1.3)
const LAS_HEADER_MIN_LEN: usize = 227;
/// Enough to cover the 1.4 extended point count at offset 247
const LAS_HEADER_READ_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq)]
struct LasHeader {
    point_count: u64,
    /// Bounding-box center in native coordinates (x, y, z)
    center: [f64; 3],
}

/// Read point count and bbox center from the public header block only.
/// LAZ shares the same header, so compressed inputs probe identically.
fn probe_las_header(path: &Path) -> Result<LasHeader, ToolError> {
    let io_err = |e: std::io::Error| ToolError::Io {
        program: "las-probe".to_string(),
        message: format!("{}: {}", path.display(), e),
    };
    let bad = |message: String| ToolError::BadOutput {
        program: "las-probe".to_string(),
        message,
    };

    let mut file = std::fs::File::open(path).map_err(io_err)?;
    let mut buf = [0u8; LAS_HEADER_READ_LEN];
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).map_err(io_err)? {
            0 => break,
            n => filled += n,
        }
    }

    if filled < LAS_HEADER_MIN_LEN {
        return Err(bad(format!("{}: truncated header", path.display())));
    }
    if &buf[0..4] != b"LASF" {
        return Err(bad(format!("{}: not a LAS/LAZ file", path.display())));
    }

    let f64_at = |offset: usize| -> f64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[offset..offset + 8]);
        f64::from_le_bytes(bytes)
    };

    let version_minor = buf[25];
    let legacy_count = {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&buf[107..111]);
        u32::from_le_bytes(bytes) as u64
    };
    let point_count = if version_minor >= 4 && filled >= 255 {
        // 1.4 moved the authoritative count; legacy field may be zeroed
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[247..255]);
        let extended = u64::from_le_bytes(bytes);
        if extended > 0 {
            extended
        } else {
            legacy_count
        }
    } else {
        legacy_count
    };

    // Header order: max_x, min_x, max_y, min_y, max_z, min_z
    let (max_x, min_x) = (f64_at(179), f64_at(187));
    let (max_y, min_y) = (f64_at(195), f64_at(203));
    let (max_z, min_z) = (f64_at(211), f64_at(219));

    Ok(LasHeader {
        point_count,
        center: [
            (min_x + max_x) / 2.0,
            (min_y + max_y) / 2.0,
            (min_z + max_z) / 2.0,
        ],
    })
}
