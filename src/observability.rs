use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "shareit_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "shareit_query_duration_seconds";

/// Counter: booking decisions. Labels: outcome (approved, rejected).
pub const BOOKINGS_DECIDED_TOTAL: &str = "shareit_bookings_decided_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "shareit_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "shareit_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "shareit_connections_rejected_total";

/// Counter: statements refused because the caller token names no known user.
pub const AUTH_FAILURES_TOTAL: &str = "shareit_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "shareit_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "shareit_wal_flush_batch_size";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::UpdateUser { .. } => "update_user",
        Command::SelectUsers { .. } => "select_users",
        Command::InsertItem { .. } => "insert_item",
        Command::UpdateItem { .. } => "update_item",
        Command::SelectItem { .. } => "select_item",
        Command::SelectOwnerItems { .. } => "select_owner_items",
        Command::SearchItems { .. } => "search_items",
        Command::InsertBooking { .. } => "insert_booking",
        Command::DecideBooking { .. } => "decide_booking",
        Command::SelectBooking { .. } => "select_booking",
        Command::SelectBookerBookings { .. } => "select_booker_bookings",
        Command::SelectOwnerBookings { .. } => "select_owner_bookings",
        Command::InsertComment { .. } => "insert_comment",
        Command::SelectComments { .. } => "select_comments",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_snake_case() {
        let cmd = crate::sql::parse_sql("SELECT * FROM owner_bookings").unwrap();
        assert_eq!(command_label(&cmd), "select_owner_bookings");
        let cmd = crate::sql::parse_sql("SELECT * FROM users").unwrap();
        assert_eq!(command_label(&cmd), "select_users");
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
