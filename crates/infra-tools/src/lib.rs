// Terraflow Infrastructure - External Tool Adapters
// Implements: CloudTools, RasterTools over black-box conversion commands

mod cloud;
mod raster;
mod runner;

pub use cloud::{CloudToolsConfig, ExternalCloudTools};
pub use raster::{GdalRasterTools, RasterToolsConfig};
