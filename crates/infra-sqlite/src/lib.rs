// Terraflow Infrastructure - SQLite Adapter
// Implements: JobStore, ProjectStore

mod connection;
mod job_store;
mod migration;
mod project_store;

pub use connection::create_pool;
pub use job_store::SqliteJobStore;
pub use migration::run_migrations;
pub use project_store::SqliteProjectStore;

// Note: sqlx::Error conversion is handled by a helper in job_store
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
