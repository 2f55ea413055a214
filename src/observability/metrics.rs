//! Metrics collection and Prometheus text export

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::state::{LoadPhase, StateSnapshot};

/// Point-in-time request counters
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    /// Total embed requests processed
    pub total_requests: u64,

    /// Total failed embed requests
    pub total_errors: u64,

    /// Failures answered with a 4xx status
    pub client_errors: u64,

    /// Failures answered with a 5xx status
    pub server_errors: u64,

    /// Requests dropped before a response was produced
    pub cancelled_requests: u64,

    /// Requests currently in flight
    pub active_requests: usize,

    /// Average request time (ms)
    pub avg_response_time_ms: f64,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

/// Latency histogram buckets (in milliseconds)
const LATENCY_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0];

/// Histogram for tracking latency distribution
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<(f64, Arc<AtomicU64>)>,
    sum: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    fn new(buckets: &[f64]) -> Self {
        Self {
            buckets: buckets
                .iter()
                .map(|&b| (b, Arc::new(AtomicU64::new(0))))
                .collect(),
            sum: Arc::new(AtomicU64::new(0)),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    fn observe(&self, value_ms: f64) {
        self.sum.fetch_add(value_ms as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        // Cumulative buckets
        for (bucket, counter) in &self.buckets {
            if value_ms <= *bucket {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn export_prometheus(&self, name: &str, help: &str) -> String {
        let mut output = String::new();

        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} histogram\n", name));

        for (bucket, counter) in &self.buckets {
            let count = counter.load(Ordering::Relaxed);
            output.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", name, bucket, count));
        }

        let total_count = self.count();
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, total_count));

        let sum = self.sum.load(Ordering::Relaxed) as f64;
        output.push_str(&format!("{}_sum {:.3}\n", name, sum));
        output.push_str(&format!("{}_count {}\n", name, total_count));

        output
    }
}

/// Metrics collector
pub struct MetricsCollector {
    start_time: Instant,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    client_errors: AtomicU64,
    server_errors: AtomicU64,
    cancelled_requests: AtomicU64,
    active_requests: AtomicUsize,
    total_response_time_ms: AtomicU64,

    request_latency: Histogram,
    preprocess_latency: Histogram,
    inference_latency: Histogram,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            client_errors: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
            cancelled_requests: AtomicU64::new(0),
            active_requests: AtomicUsize::new(0),
            total_response_time_ms: AtomicU64::new(0),
            request_latency: Histogram::new(LATENCY_BUCKETS),
            preprocess_latency: Histogram::new(LATENCY_BUCKETS),
            inference_latency: Histogram::new(LATENCY_BUCKETS),
        }
    }

    /// Record a finished embed request
    pub fn record_request(&self, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let ms = response_time.as_millis() as u64;
        self.total_response_time_ms.fetch_add(ms, Ordering::Relaxed);
        self.request_latency.observe(ms as f64);
    }

    pub fn record_preprocess_latency(&self, duration: Duration) {
        self.preprocess_latency.observe(duration.as_millis() as f64);
    }

    pub fn record_inference_latency(&self, duration: Duration) {
        self.inference_latency.observe(duration.as_millis() as f64);
    }

    /// Record a failed request by response status code
    pub fn record_error(&self, status: u16) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        if status >= 500 {
            self.server_errors.fetch_add(1, Ordering::Relaxed);
        } else if status >= 400 {
            self.client_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_active(&self) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_active(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }

    /// Count a request as in flight until the returned guard is dropped
    pub fn begin_request(self: &Arc<Self>) -> ActiveRequest {
        self.increment_active();
        ActiveRequest {
            collector: Arc::clone(self),
            started: Instant::now(),
            status: None,
        }
    }

    pub fn get_metrics(&self) -> ServiceMetrics {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.total_response_time_ms.load(Ordering::Relaxed);

        let avg_response_time_ms = if total_requests > 0 {
            total_response_time as f64 / total_requests as f64
        } else {
            0.0
        };

        ServiceMetrics {
            total_requests,
            total_errors: self.total_errors.load(Ordering::Relaxed),
            client_errors: self.client_errors.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
            cancelled_requests: self.cancelled_requests.load(Ordering::Relaxed),
            active_requests: self.active_requests.load(Ordering::Relaxed),
            avg_response_time_ms,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Export metrics in Prometheus format, including model state
    pub fn export_prometheus(&self, state: &StateSnapshot) -> String {
        let metrics = self.get_metrics();

        let mut output = format!(
            "# HELP image_embedder_requests_total Total number of embed requests\n\
             # TYPE image_embedder_requests_total counter\n\
             image_embedder_requests_total {}\n\
             \n\
             # HELP image_embedder_errors_total Total number of failed embed requests\n\
             # TYPE image_embedder_errors_total counter\n\
             image_embedder_errors_total {}\n\
             \n\
             # HELP image_embedder_errors_by_class_total Failed embed requests by status class\n\
             # TYPE image_embedder_errors_by_class_total counter\n\
             image_embedder_errors_by_class_total{{class=\"4xx\"}} {}\n\
             image_embedder_errors_by_class_total{{class=\"5xx\"}} {}\n\
             \n\
             # HELP image_embedder_cancelled_requests_total Embed requests dropped before responding\n\
             # TYPE image_embedder_cancelled_requests_total counter\n\
             image_embedder_cancelled_requests_total {}\n\
             \n\
             # HELP image_embedder_active_requests Embed requests currently in flight\n\
             # TYPE image_embedder_active_requests gauge\n\
             image_embedder_active_requests {}\n\
             \n\
             # HELP image_embedder_avg_response_time_ms Average embed request time in milliseconds\n\
             # TYPE image_embedder_avg_response_time_ms gauge\n\
             image_embedder_avg_response_time_ms {:.2}\n\
             \n\
             # HELP image_embedder_uptime_seconds Uptime in seconds\n\
             # TYPE image_embedder_uptime_seconds counter\n\
             image_embedder_uptime_seconds {}\n\
             \n\
             # HELP image_embedder_model_loaded Whether the model is loaded\n\
             # TYPE image_embedder_model_loaded gauge\n\
             image_embedder_model_loaded{{model=\"{}\",device=\"{}\"}} {}\n\
             \n\
             # HELP image_embedder_model_load_attempts_total Model load attempts\n\
             # TYPE image_embedder_model_load_attempts_total counter\n\
             image_embedder_model_load_attempts_total {}\n\
             \n\
             # HELP image_embedder_model_load_failures_total Failed model loads\n\
             # TYPE image_embedder_model_load_failures_total counter\n\
             image_embedder_model_load_failures_total {}\n\
             \n",
            metrics.total_requests,
            metrics.total_errors,
            metrics.client_errors,
            metrics.server_errors,
            metrics.cancelled_requests,
            metrics.active_requests,
            metrics.avg_response_time_ms,
            metrics.uptime_secs,
            state.model_name,
            state.device,
            u8::from(state.phase == LoadPhase::Loaded),
            state.load_attempts,
            state.load_failures,
        );

        output.push_str(&self.request_latency.export_prometheus(
            "image_embedder_request_duration_ms",
            "Embed request duration in milliseconds",
        ));
        output.push('\n');

        output.push_str(&self.preprocess_latency.export_prometheus(
            "image_embedder_preprocess_duration_ms",
            "Image decode and resize duration in milliseconds",
        ));
        output.push('\n');

        output.push_str(&self.inference_latency.export_prometheus(
            "image_embedder_inference_duration_ms",
            "Model inference duration in milliseconds",
        ));

        output
    }
}

/// One in-flight embed request.
///
/// Records the request when dropped. A guard dropped without [`ActiveRequest::finish`]
/// belongs to a request whose client disconnected.
pub struct ActiveRequest {
    collector: Arc<MetricsCollector>,
    started: Instant,
    status: Option<u16>,
}

impl ActiveRequest {
    /// Mark the request answered with `status`
    pub fn finish(&mut self, status: u16) {
        self.status = Some(status);
    }
}

impl Drop for ActiveRequest {
    fn drop(&mut self) {
        let collector = &self.collector;
        collector.decrement_active();
        collector.record_request(self.started.elapsed());
        match self.status {
            Some(status) if status >= 400 => collector.record_error(status),
            Some(_) => {}
            None => {
                collector.cancelled_requests.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
