use std::time::Duration;

use tracing::Level;

// Same as node's and tokio's default read chunk for files.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

// Stands in for "until it breaks or someone stops it". Prefer the cancellation token
// for long runs.
pub const DEFAULT_MAX_ITERATIONS: u64 = 1_000_000;

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

pub const ITERATION_TRACING_LOG_LEVEL: Level = Level::DEBUG;
