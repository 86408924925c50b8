use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total protocol requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "slotkeeper_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "slotkeeper_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotkeeper_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotkeeper_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotkeeper_connections_rejected_total";

/// Counter: failed logins.
pub const AUTH_FAILURES_TOTAL: &str = "slotkeeper_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotkeeper_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotkeeper_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: reservations created. Labels: category.
pub const RESERVATIONS_CREATED_TOTAL: &str = "slotkeeper_reservations_created_total";

/// Counter: state transitions applied. Labels: action.
pub const TRANSITIONS_TOTAL: &str = "slotkeeper_transitions_total";

/// Counter: pending reservations rejected by an approval cascade.
pub const AUTO_REJECTED_TOTAL: &str = "slotkeeper_auto_rejected_total";

/// Counter: creation requests turned away by admission. Labels: reason.
pub const REJECTIONS_TOTAL: &str = "slotkeeper_admission_rejections_total";

/// Counter: failed operations. Labels: kind.
pub const ENGINE_ERRORS_TOTAL: &str = "slotkeeper_engine_errors_total";

/// Counter: notifications the sink failed to accept.
pub const NOTIFY_FAILURES_TOTAL: &str = "slotkeeper_notify_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Count a failed engine operation by its taxonomy label.
pub fn record_engine_error(err: &EngineError) {
    metrics::counter!(ENGINE_ERRORS_TOTAL, "kind" => err.kind()).increment(1);
}
