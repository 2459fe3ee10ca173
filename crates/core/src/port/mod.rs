// Port Layer - Interfaces for external dependencies

pub mod blob_store;
pub mod cloud_tools;
pub mod id_provider; // For deterministic testing
pub mod job_store;
pub mod project_store;
pub mod raster_tools;
pub mod time_provider;
pub mod tool;

// Re-exports
pub use blob_store::BlobStore;
pub use cloud_tools::{CloudSummary, CloudTools};
pub use id_provider::IdProvider;
pub use job_store::{JobPatch, JobStore};
pub use project_store::ProjectStore;
pub use raster_tools::RasterTools;
pub use time_provider::TimeProvider;
pub use tool::{ToolCommand, ToolError, ToolOutput};
