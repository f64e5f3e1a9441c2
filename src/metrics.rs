use lazy_static::lazy_static;
use metrics::{Counter, Gauge, Histogram, counter, gauge, histogram};

pub struct Metrics {
    pub bytes_read: Counter,
    pub chunks_read: Counter,
    pub handles_opened: Counter,
    pub handles_released: Counter,
    pub iteration_duration: Histogram,
    pub iterations_failed: Counter,
    pub iterations_started: Counter,
    pub iterations_succeeded: Counter,
    pub open_handles: Gauge,
    pub release_failures: Counter,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            bytes_read: counter!("streamcheck_bytes_read"),
            chunks_read: counter!("streamcheck_chunks_read"),
            handles_opened: counter!("streamcheck_handles_opened"),
            handles_released: counter!("streamcheck_handles_released"),
            iteration_duration: histogram!("streamcheck_iteration_duration_seconds"),
            iterations_failed: counter!("streamcheck_iterations_failed"),
            iterations_started: counter!("streamcheck_iterations_started"),
            iterations_succeeded: counter!("streamcheck_iterations_succeeded"),
            open_handles: gauge!("streamcheck_open_handles"),
            release_failures: counter!("streamcheck_release_failures"),
        }
    }
}

lazy_static! {
    pub static ref METRICS: Metrics = Metrics::new();
}
