use std::net::SocketAddr;

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: bookings written by the desk. Labels: outcome (created, updated, status).
pub const BOOKINGS_SAVED_TOTAL: &str = "tandemgrid_bookings_saved_total";

/// Counter: saves refused for lack of seats. Labels: kind (capacity, stale).
pub const CAPACITY_REJECTIONS_TOTAL: &str = "tandemgrid_capacity_rejections_total";

/// Counter: privileged saves that went past the computed capacity.
pub const OVERBOOKINGS_TOTAL: &str = "tandemgrid_overbookings_total";

// ── Live sync ───────────────────────────────────────────────────

/// Gauge: edit sessions currently open in this process.
pub const EDIT_SESSIONS_ACTIVE: &str = "tandemgrid_edit_sessions_active";

/// Counter: store changes applied to grids and edit sessions.
pub const SYNC_EVENTS_TOTAL: &str = "tandemgrid_sync_events_total";

/// Counter: full refetches after a subscriber lagged behind the store.
pub const SYNC_RESYNCS_TOTAL: &str = "tandemgrid_sync_resyncs_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tandemgrid_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tandemgrid_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status (ok, error).
pub const WAL_COMPACTIONS_TOTAL: &str = "tandemgrid_wal_compactions_total";

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
