use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "courtbook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "courtbook_http_request_duration_seconds";

/// Counter: reservation operations. Labels: op, outcome.
pub const BOOKING_OPERATIONS_TOTAL: &str = "courtbook_booking_operations_total";

/// Counter: holds moved to EXPIRED. Labels: by (sweeper, insert, confirm).
pub const HOLDS_EXPIRED_TOTAL: &str = "courtbook_holds_expired_total";

/// Counter: bearer tokens that failed to authenticate.
pub const AUTH_FAILURES_TOTAL: &str = "courtbook_auth_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: hold sweep duration in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "courtbook_sweep_duration_seconds";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "courtbook_wal_compactions_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "courtbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "courtbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
