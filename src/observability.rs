use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "splitroom_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "splitroom_query_duration_seconds";

// ── Ledger ──────────────────────────────────────────────────────

/// Counter: registrations rejected by an existing booking. Labels: half.
pub const CONFLICTS_TOTAL: &str = "splitroom_conflicts_total";

/// Gauge: active (not cancelled) reservations across all dates.
pub const RESERVATIONS_ACTIVE: &str = "splitroom_reservations_active";

/// Histogram: full snapshot write duration in seconds.
pub const SNAPSHOT_SAVE_DURATION_SECONDS: &str = "splitroom_snapshot_save_duration_seconds";

/// Counter: snapshot writes that failed (change kept in memory only).
pub const SNAPSHOT_SAVE_FAILURES_TOTAL: &str = "splitroom_snapshot_save_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "splitroom_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "splitroom_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "splitroom_connections_rejected_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Register(_) => "register",
        Command::Cancel { .. } => "cancel",
        Command::ListReservations { .. } => "list_reservations",
        Command::SelectOccupancy { .. } => "select_occupancy",
        Command::SelectAvailability { .. } => "select_availability",
    }
}
