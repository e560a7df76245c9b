use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Installs the Prometheus recorder and returns the render handle.
pub fn init_metrics() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// Global metrics accessor; recording before `init_metrics` is a no-op on
/// the default recorder.
pub fn get_metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Domain metrics for the money-movement engine.
#[derive(Debug, Clone)]
pub struct Metrics;

impl Metrics {
    fn new() -> Self {
        Self
    }

    pub fn record_posting(&self, tx_type: &str, currency: &str, replayed: bool) {
        counter!(
            "ledger_postings_total",
            "type" => tx_type.to_string(),
            "currency" => currency.to_string(),
            "replayed" => replayed.to_string()
        )
        .increment(1);
    }

    pub fn record_posting_latency(&self, duration_ms: f64) {
        histogram!("ledger_posting_duration_ms").record(duration_ms);
    }

    pub fn record_reversal(&self, tx_type: &str) {
        counter!("ledger_reversals_total", "type" => tx_type.to_string()).increment(1);
    }

    pub fn record_saga(&self, op_type: &str, status: &str, duration_ms: f64) {
        counter!(
            "saga_runs_total",
            "op" => op_type.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!("saga_duration_ms", "op" => op_type.to_string()).record(duration_ms);
    }

    pub fn record_saga_recovered(&self, op_type: &str) {
        counter!("saga_recovered_total", "op" => op_type.to_string()).increment(1);
    }

    pub fn record_wallet_sync_latency(&self, duration_ms: f64) {
        histogram!("wallet_sync_duration_ms").record(duration_ms);
    }

    pub fn record_event_published(&self, topic: &str, success: bool) {
        counter!(
            "events_published_total",
            "topic" => topic.to_string(),
            "success" => success.to_string()
        )
        .increment(1);
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!("http_request_duration_ms", "path" => path.to_string()).record(duration_ms);
    }

    pub fn set_stuck_sagas(&self, count: i64) {
        gauge!("saga_stuck_current").set(count as f64);
    }
}
