use std::net::SocketAddr;

// ── Booking operations ──────────────────────────────────────────

/// Counter: coordinator operations. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "studiokeep_operations_total";

/// Histogram: coordinator operation latency in seconds. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "studiokeep_operation_duration_seconds";

/// Counter: create/update attempts that lost an optimistic race and retried.
pub const COMMIT_RETRIES_TOTAL: &str = "studiokeep_commit_retries_total";

/// Counter: requests refused because three holders already overlap.
pub const KEEP_LIMIT_REJECTIONS_TOTAL: &str = "studiokeep_keep_limit_rejections_total";

/// Counter: bookings moved up one rank.
pub const PROMOTIONS_TOTAL: &str = "studiokeep_promotions_total";

/// Counter: promotion batches that committed only some of their chunks.
pub const PARTIAL_PROMOTIONS_TOTAL: &str = "studiokeep_partial_promotions_total";

/// Counter: temporary bookings cancelled by the expiry reaper.
pub const REAPED_TOTAL: &str = "studiokeep_reaped_total";

/// Counter: expired bookings the reaper could not cancel. Retried next pass.
pub const REAPER_FAILURES_TOTAL: &str = "studiokeep_reaper_failures_total";

/// Counter: schedule sink calls that failed after a commit.
pub const SCHEDULE_SINK_FAILURES_TOTAL: &str = "studiokeep_schedule_sink_failures_total";

// ── Store ───────────────────────────────────────────────────────

/// Counter: store transactions. Labels: status (committed, rejected, timed_out, failed).
pub const STORE_TRANSACTIONS_TOTAL: &str = "studiokeep_store_transactions_total";

/// Histogram: lock-to-apply duration of a committed transaction in seconds.
pub const STORE_COMMIT_DURATION_SECONDS: &str = "studiokeep_store_commit_duration_seconds";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "studiokeep_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "studiokeep_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
