use std::time::{Duration, Instant};

use tracing::info;

use crate::{constants::ITERATION_TRACING_LOG_LEVEL, utils::mb_per_sec};

// Per-iteration events go out at ITERATION_TRACING_LOG_LEVEL; a summary with throughput
// is printed at info at most once per interval.
pub(crate) struct Progress {
    interval: Duration,
    start: Instant,
    last_print: Instant,
    iterations: u64,
    bytes: u64,
    iterations_since_print: u64,
    bytes_since_print: u64,
}

impl Progress {
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            start: now,
            last_print: now,
            iterations: 0,
            bytes: 0,
            iterations_since_print: 0,
            bytes_since_print: 0,
        }
    }

    /// Returns true if a summary line was printed.
    pub fn on_iteration_done(&mut self, iteration: u64, len: u64) -> bool {
        self.on_iteration_done_at(iteration, len, Instant::now())
    }

    fn on_iteration_done_at(&mut self, iteration: u64, len: u64, now: Instant) -> bool {
        self.iterations += 1;
        self.bytes += len;
        self.iterations_since_print += 1;
        self.bytes_since_print += len;

        tracing::event!(
            ITERATION_TRACING_LOG_LEVEL,
            iteration,
            len,
            "iteration completed successfully"
        );

        let since_print = now.duration_since(self.last_print);
        if since_print < self.interval {
            return false;
        }
        info!(
            iteration,
            total_iterations = self.iterations,
            iterations_since_last = self.iterations_since_print,
            "progress: {:.2} MB/s",
            mb_per_sec(self.bytes_since_print, since_print.as_secs_f64())
        );
        self.last_print = now;
        self.iterations_since_print = 0;
        self.bytes_since_print = 0;
        true
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes
    }
}
