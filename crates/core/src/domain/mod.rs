// Domain Layer - Pure business logic and entities

pub mod error;
pub mod job;
pub mod project;

// Re-exports
pub use error::DomainError;
pub use job::{Job, JobId, JobKind, JobStatus};
pub use project::{Crs, Location, OrthoOverlay, OverlayBounds, Project, ProjectId};
