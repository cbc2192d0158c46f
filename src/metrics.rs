use metrics::{counter, histogram};
use std::time::Instant;

/// Initialize Prometheus metrics exporter and return handle
pub fn init_metrics() -> metrics_exporter_prometheus::PrometheusHandle {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("failed to install Prometheus exporter")
}

/// Record artifact bytes served
pub fn record_bytes_served(bytes: u64) {
    counter!("ytdlp_gateway_bytes_served_total").increment(bytes);
}

/// Tracks one download request from arrival to outcome: counts the request
/// on creation, counts the result and records the duration on completion.
pub struct MetricsGuard {
    start: Instant,
}

impl MetricsGuard {
    pub fn new() -> Self {
        counter!("ytdlp_gateway_download_requests_total").increment(1);
        Self {
            start: Instant::now(),
        }
    }

    pub fn success(self) {
        counter!("ytdlp_gateway_download_success_total").increment(1);
        self.finish();
    }

    pub fn error(self) {
        counter!("ytdlp_gateway_download_errors_total").increment(1);
        self.finish();
    }

    fn finish(self) {
        histogram!("ytdlp_gateway_download_duration_seconds").record(self.start.elapsed().as_secs_f64());
    }
}

impl Default for MetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}
