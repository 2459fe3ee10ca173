// Application Layer - Use Cases and Services

pub mod pipeline;
pub mod service;
pub mod worker;

// Re-exports
pub use pipeline::PipelineRunner;
pub use service::{CancelOutcome, JobService, SubmitRequest};
pub use worker::{shutdown_channel, ShutdownSender, ShutdownToken, Worker, WorkerConfig};
