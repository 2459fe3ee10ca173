// Daemon configuration, read from the environment with sensible
// defaults. Paths accept `~` expansion.

use std::path::PathBuf;
use std::time::Duration;
use terraflow_core::application::WorkerConfig;
use terraflow_infra_tools::{CloudToolsConfig, RasterToolsConfig};

const DEFAULT_DB_PATH: &str = "~/.terraflow/meta.db";
const DEFAULT_BLOB_ROOT: &str = "~/.terraflow/blobs";
const DEFAULT_WORK_DIR: &str = "~/.terraflow/work";
const DEFAULT_CONVERTER_BIN: &str = "/opt/terraflow/converter";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: String,
    pub blob_root: PathBuf,
    pub public_base_url: String,
    pub work_dir: PathBuf,
    pub worker: WorkerConfig,
    pub cloud_tools: CloudToolsConfig,
    pub raster_tools: RasterToolsConfig,
}

fn env_path(name: &str, default: &str) -> String {
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    shellexpand::tilde(&raw).into_owned()
}

fn env_secs(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        std::env::var(name)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default),
    )
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let blob_root = PathBuf::from(env_path("TERRAFLOW_BLOB_ROOT", DEFAULT_BLOB_ROOT));
        let public_base_url = std::env::var("TERRAFLOW_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("file://{}", blob_root.display()));

        let worker = WorkerConfig {
            poll_interval: env_secs("TERRAFLOW_POLL_INTERVAL_SECS", 5),
            retention_max_age: env_secs("TERRAFLOW_RETENTION_SECS", 72 * 60 * 60),
            sweep_interval: env_secs("TERRAFLOW_SWEEP_INTERVAL_SECS", 60 * 60),
        };

        let mut cloud_tools = CloudToolsConfig::new(env_path(
            "TERRAFLOW_CONVERTER_BIN",
            DEFAULT_CONVERTER_BIN,
        ));
        if let Ok(bin) = std::env::var("TERRAFLOW_GDALTRANSFORM_BIN") {
            cloud_tools.gdaltransform_bin = PathBuf::from(bin);
        }
        cloud_tools.preview_bin = std::env::var("TERRAFLOW_PREVIEW_BIN")
            .ok()
            .map(|p| PathBuf::from(shellexpand::tilde(&p).into_owned()));

        let mut raster_tools = RasterToolsConfig::default();
        if let Ok(bin) = std::env::var("TERRAFLOW_GDALINFO_BIN") {
            raster_tools.gdalinfo_bin = PathBuf::from(bin);
        }
        if let Ok(bin) = std::env::var("TERRAFLOW_GDAL_TRANSLATE_BIN") {
            raster_tools.gdal_translate_bin = PathBuf::from(bin);
        }

        Self {
            db_path: env_path("TERRAFLOW_DB_PATH", DEFAULT_DB_PATH),
            blob_root,
            public_base_url,
            work_dir: PathBuf::from(env_path("TERRAFLOW_WORK_DIR", DEFAULT_WORK_DIR)),
            worker,
            cloud_tools,
            raster_tools,
        }
    }
}
