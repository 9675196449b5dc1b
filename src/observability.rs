use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "kennelbook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "kennelbook_query_duration_seconds";

/// Counter: booking attempts. Labels: outcome (booked, conflict, invalid, not_found, error).
pub const BOOKINGS_TOTAL: &str = "kennelbook_bookings_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "kennelbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "kennelbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "kennelbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "kennelbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "kennelbook_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Record one executed statement.
pub fn record_query(label: &'static str, ok: bool, elapsed: std::time::Duration) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
    metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(elapsed.as_secs_f64());
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateOwner { .. } => "create_owner",
        Command::RegisterKennel(_) => "register_kennel",
        Command::AddDog(_) => "add_dog",
        Command::PublishAvailability { .. } => "publish_availability",
        Command::BookKennel { .. } => "book_kennel",
        Command::ReviewBooking { .. } => "review_booking",
        Command::SelectAvailableKennels { .. } => "select_available_kennels",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookingsForOwner { .. } => "select_bookings_for_owner",
        Command::SelectBookingsForHost { .. } => "select_bookings_for_host",
        Command::SelectKennelsForHost { .. } => "select_kennels_for_host",
        Command::SelectDogsForOwner { .. } => "select_dogs_for_owner",
        Command::SelectOwnerByEmail { .. } => "select_owner_by_email",
        Command::SelectSchedule { .. } => "select_schedule",
    }
}
