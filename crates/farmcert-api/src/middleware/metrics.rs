//! # Prometheus Metrics
//!
//! HTTP metrics are recorded by [`metrics_middleware`]. Certification
//! metrics are pushed by the orchestrator as decisions are made and ledger
//! writes resolve. The farmer bucket gauge is refreshed on each `/metrics`
//! scrape (pull model), see the handler in `lib.rs`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use prometheus::core::Collector;
use prometheus::{Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Shared metrics state backed by a Prometheus registry.
#[derive(Clone)]
pub struct ApiMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,

    // -- HTTP middleware metrics --
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_errors_total: IntCounterVec,

    // -- Certification metrics --
    decisions_total: IntCounterVec,
    ledger_submissions_total: IntCounterVec,
    farmers: GaugeVec,
}

impl std::fmt::Debug for ApiMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiMetrics")
            .field("requests", &self.requests())
            .field("errors", &self.errors())
            .finish()
    }
}

impl ApiMetrics {
    /// Create a new metrics instance with a fresh Prometheus registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("farmcert_http_requests_total", "Total HTTP requests"),
            &["method", "status"],
        )
        .expect("metric can be created");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "farmcert_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["method"],
        )
        .expect("metric can be created");

        let http_errors_total = IntCounterVec::new(
            Opts::new("farmcert_http_errors_total", "Total HTTP errors (4xx and 5xx)"),
            &["method", "status"],
        )
        .expect("metric can be created");

        let decisions_total = IntCounterVec::new(
            Opts::new("farmcert_decisions_total", "Certification decisions by outcome"),
            &["outcome"],
        )
        .expect("metric can be created");

        let ledger_submissions_total = IntCounterVec::new(
            Opts::new(
                "farmcert_ledger_submissions_total",
                "Registry writes by final state (confirmed, reverted, unresolved)",
            ),
            &["state"],
        )
        .expect("metric can be created");

        let farmers = GaugeVec::new(
            Opts::new("farmcert_farmers", "Farmers by certification bucket"),
            &["bucket"],
        )
        .expect("metric can be created");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(http_errors_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(decisions_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(ledger_submissions_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(farmers.clone()))
            .expect("metric can be registered");

        Self {
            inner: Arc::new(Inner {
                registry,
                http_requests_total,
                http_request_duration_seconds,
                http_errors_total,
                decisions_total,
                ledger_submissions_total,
                farmers,
            }),
        }
    }

    /// Total request count (sum across all labels).
    pub fn requests(&self) -> u64 {
        sum_counter(&self.inner.http_requests_total)
    }

    /// Total error count (sum across all labels).
    pub fn errors(&self) -> u64 {
        sum_counter(&self.inner.http_errors_total)
    }

    /// Decisions recorded with the given outcome.
    pub fn decisions(&self, outcome: &str) -> u64 {
        self.inner.decisions_total.with_label_values(&[outcome]).get()
    }

    fn record_request(&self, method: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.inner
            .http_requests_total
            .with_label_values(&[method, &status_str])
            .inc();
        self.inner
            .http_request_duration_seconds
            .with_label_values(&[method])
            .observe(duration_secs);
        if status >= 400 {
            self.inner
                .http_errors_total
                .with_label_values(&[method, &status_str])
                .inc();
        }
    }

    /// Count a certification decision.
    pub fn record_decision(&self, outcome: &str) {
        self.inner.decisions_total.with_label_values(&[outcome]).inc();
    }

    /// Count a registry write reaching its final state.
    pub fn record_submission(&self, state: &str) {
        self.inner
            .ledger_submissions_total
            .with_label_values(&[state])
            .inc();
    }

    /// Access the farmer bucket gauge for updating.
    pub fn farmers(&self) -> &GaugeVec {
        &self.inner.farmers
    }

    /// Gather all metrics and encode to Prometheus text format.
    pub fn gather_and_encode(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("failed to encode metrics: {e}"))?;
        String::from_utf8(buffer).map_err(|e| format!("metrics encoding produced invalid UTF-8: {e}"))
    }
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn sum_counter(counter: &IntCounterVec) -> u64 {
    counter
        .collect()
        .iter()
        .flat_map(|mf| mf.get_metric())
        .map(|m| m.get_counter().get_value() as u64)
        .sum()
}

/// Middleware that records HTTP request metrics.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(m) = metrics {
        m.record_request(&method, response.status().as_u16(), start.elapsed().as_secs_f64());
    }

    response
}
