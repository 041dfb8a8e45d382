//! Prometheus metrics for the broadcast engine
//!
//! - sends per recipient outcome and transport latency
//! - campaign lifecycle transitions
//! - live campaign workers
//! - API requests
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct EngineMetrics {
    sends: CounterVec,
    send_duration: HistogramVec,
    transitions: CounterVec,
    active_workers: Gauge,
    api_requests: CounterVec,
}

static ENGINE_METRICS: OnceLock<EngineMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Register all metrics with the default registry
///
/// Idempotent. On failure the error is returned and recording stays a no-op.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = EngineMetrics {
        sends: register_counter_vec!(
            "siaran_sends_total",
            "Recipient attempts by outcome",
            &["outcome"]
        )?,
        send_duration: register_histogram_vec!(
            "siaran_send_duration_seconds",
            "Transport call duration including retries",
            &["channel_type"],
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
        )?,
        transitions: register_counter_vec!(
            "siaran_campaign_transitions_total",
            "Campaign state transitions by target state",
            &["to"]
        )?,
        active_workers: register_gauge!(
            "siaran_active_workers",
            "Campaign workers currently running"
        )?,
        api_requests: register_counter_vec!(
            "siaran_api_requests_total",
            "API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
    };

    ENGINE_METRICS
        .set(metrics)
        .map_err(|_| "Engine metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

pub fn metrics_initialized() -> bool {
    ENGINE_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one recipient outcome (`sent`, `failed`, `skipped-reply`, ...)
pub fn record_send(outcome: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.sends.with_label_values(&[outcome]).inc();
    }
}

/// Record a campaign entering state `to`
pub fn record_transition(to: &str) {
    if let Some(m) = ENGINE_METRICS.get() {
        m.transitions.with_label_values(&[to]).inc();
    }
}

pub fn worker_started() {
    if let Some(m) = ENGINE_METRICS.get() {
        m.active_workers.inc();
    }
}

pub fn worker_stopped() {
    if let Some(m) = ENGINE_METRICS.get() {
        m.active_workers.dec();
    }
}

pub fn record_api_request(endpoint: &str, status: u16) {
    if let Some(m) = ENGINE_METRICS.get() {
        let status = status.to_string();
        m.api_requests.with_label_values(&[endpoint, &status]).inc();
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Time one transport call
pub fn start_send_timer(channel_type: &str) -> MetricsTimer {
    MetricsTimer {
        timer: ENGINE_METRICS
            .get()
            .map(|m| m.send_duration.with_label_values(&[channel_type]).start_timer()),
    }
}
