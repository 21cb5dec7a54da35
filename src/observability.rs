use std::net::SocketAddr;

// ── Request counters ────────────────────────────────────────────

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "innkeep_bookings_created_total";

/// Counter: bookings cancelled.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "innkeep_bookings_cancelled_total";

/// Counter: create/update attempts rejected for a date conflict.
pub const AVAILABILITY_CONFLICTS_TOTAL: &str = "innkeep_availability_conflicts_total";

/// Counter: service attachments (adds and merges).
pub const SERVICE_ATTACHMENTS_TOTAL: &str = "innkeep_service_attachments_total";

// ── Gauges & durability histograms ──────────────────────────────

/// Gauge: bookings currently in an active status (pending/checked_in).
pub const BOOKINGS_ACTIVE: &str = "innkeep_bookings_active";

/// Gauge: number of active properties (loaded engines).
pub const PROPERTIES_ACTIVE: &str = "innkeep_properties_active";

/// Histogram: seconds spent in each group-commit fsync.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: events committed per flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

/// Start the Prometheus exporter when a port is configured.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("serving metrics on http://{addr}/metrics");
}

/// Install the fmt tracing subscriber. Call once from the embedding process.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
