//! Folio Telemetry - Observability Infrastructure
//!
//! Structured logging through `tracing` and Prometheus metrics for the API layer.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use self::metrics::{metrics_handler, FolioMetrics, METRICS};
pub use self::middleware::observability_middleware;
pub use self::tracer::{init_tracing, TelemetryConfig};
