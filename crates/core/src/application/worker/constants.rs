// Worker constants

use std::time::Duration;

/// Sleep between polls when no job is available (5s)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Job records older than this are deleted by the retention sweep (72h)
pub const DEFAULT_RETENTION_MAX_AGE: Duration = Duration::from_secs(72 * 60 * 60);

/// Cadence of the retention sweep (1h)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
