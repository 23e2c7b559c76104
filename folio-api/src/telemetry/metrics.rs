//! Prometheus Metrics Definitions
//!
//! Request metrics and permission lookups are recorded as they happen. Cache
//! and query statistics already live in `folio-storage` counters, so they are
//! copied into gauges when `/metrics` is scraped.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use folio_storage::{CacheStats, QueryTotals};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// HTTP request latency buckets (seconds)
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<FolioMetrics>> = Lazy::new(FolioMetrics::new);

/// Container for all Folio metrics.
#[derive(Clone)]
pub struct FolioMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Permission resolutions - labels: source (token, cache, role_defaults)
    pub permission_lookups_total: CounterVec,

    /// Current L1 cache entries
    pub cache_l1_entries: Gauge,

    /// Cache lookup outcomes since start - labels: tier, result
    pub cache_lookups: GaugeVec,

    /// L2 failures since start - labels: kind (read, write, dropped)
    pub cache_l2_failures: GaugeVec,

    /// Query executor totals since start - labels: kind
    /// (invocations, errors, cache_hits, fingerprints)
    pub query_totals: GaugeVec,

    /// Cumulative query latency in milliseconds
    pub query_latency_ms_total: Gauge,
}

fn registration_error(name: &str, e: prometheus::Error) -> ApiError {
    ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

impl FolioMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "folio_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| registration_error("http_requests_total", e))?,

            http_request_duration_seconds: register_histogram_vec!(
                "folio_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| registration_error("http_request_duration_seconds", e))?,

            permission_lookups_total: register_counter_vec!(
                "folio_permission_lookups_total",
                "Permission resolutions by source",
                &["source"]
            )
            .map_err(|e| registration_error("permission_lookups_total", e))?,

            cache_l1_entries: register_gauge!(
                "folio_cache_l1_entries",
                "Current number of entries in the in-process query cache"
            )
            .map_err(|e| registration_error("cache_l1_entries", e))?,

            cache_lookups: register_gauge_vec!(
                "folio_cache_lookups",
                "Query cache lookup outcomes since start",
                &["tier", "result"]
            )
            .map_err(|e| registration_error("cache_lookups", e))?,

            cache_l2_failures: register_gauge_vec!(
                "folio_cache_l2_failures",
                "Distributed cache failures since start",
                &["kind"]
            )
            .map_err(|e| registration_error("cache_l2_failures", e))?,

            query_totals: register_gauge_vec!(
                "folio_query_totals",
                "Query executor totals since start",
                &["kind"]
            )
            .map_err(|e| registration_error("query_totals", e))?,

            query_latency_ms_total: register_gauge!(
                "folio_query_latency_ms_total",
                "Cumulative query latency in milliseconds"
            )
            .map_err(|e| registration_error("query_latency_ms_total", e))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_permission_lookup(&self, source: &str) {
        self.permission_lookups_total
            .with_label_values(&[source])
            .inc();
    }

    /// Copy cache and query statistics into the gauges.
    pub fn refresh(&self, cache: &CacheStats, queries: &QueryTotals) {
        let c = &cache.counters;
        self.cache_l1_entries.set(cache.l1_entries as f64);

        for (tier, result, value) in [
            ("l1", "hit", c.l1_hits),
            ("l1", "miss", c.l1_misses),
            ("l2", "hit", c.l2_hits),
            ("l2", "miss", c.l2_misses),
        ] {
            self.cache_lookups
                .with_label_values(&[tier, result])
                .set(value as f64);
        }

        for (kind, value) in [
            ("read", c.l2_errors),
            ("write", c.l2_write_failures),
            ("dropped", c.l2_writes_dropped),
        ] {
            self.cache_l2_failures
                .with_label_values(&[kind])
                .set(value as f64);
        }

        for (kind, value) in [
            ("invocations", queries.invocations),
            ("errors", queries.errors),
            ("cache_hits", queries.cache_hits),
            ("fingerprints", queries.fingerprints as u64),
        ] {
            self.query_totals.with_label_values(&[kind]).set(value as f64);
        }
        self.query_latency_ms_total.set(queries.cumulative_latency_ms);
    }
}

/// Handler for GET /metrics.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match METRICS.as_ref() {
        Ok(metrics) => metrics.refresh(
            &state.executor.cache().stats(),
            &state.executor.stats().totals(),
        ),
        Err(e) => tracing::warn!(error = %e, "Metrics unavailable"),
    }

    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
