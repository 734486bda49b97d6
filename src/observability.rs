use std::io;
use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "tentshift_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "tentshift_query_duration_seconds";

/// Counter: stored intervals deleted by availability reconciliation.
pub const INTERVALS_REPLACED_TOTAL: &str = "tentshift_intervals_replaced_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "tentshift_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "tentshift_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "tentshift_connections_rejected_total";

/// Gauge: number of loaded seasons (engines).
pub const TENANTS_ACTIVE: &str = "tentshift_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tentshift_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tentshift_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> io::Result<()> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(io::Error::other)?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertTent { .. } => "insert_tent",
        Command::JoinTent { .. } => "join_tent",
        Command::UpdateTent { .. } => "update_tent",
        Command::UpdateProfile { .. } => "update_profile",
        Command::InsertAvailability { .. } => "insert_availability",
        Command::BatchInsertAvailability { .. } => "batch_insert_availability",
        Command::InsertShift { .. } => "insert_shift",
        Command::DeleteShift { .. } => "delete_shift",
        Command::InsertAssignment { .. } => "insert_assignment",
        Command::DeleteAssignment { .. } => "delete_assignment",
        Command::SelectTent { .. } => "select_tent",
        Command::SelectProfiles { .. } => "select_profiles",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectCoverage { .. } => "select_coverage",
        Command::SelectShifts { .. } => "select_shifts",
        Command::SelectShiftSummary { .. } => "select_shift_summary",
        Command::Listen { .. } => "listen",
    }
}
