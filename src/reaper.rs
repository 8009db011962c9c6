use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::engine::{BookingError, Engine};
use crate::model::BookingId;
use crate::observability;
use crate::store::MemoryStore;

/// Outcome of one reaper pass.
#[derive(Debug, Default)]
pub struct ReapPass {
    pub reaped: Vec<BookingId>,
    /// Still expired but not cancelled. Picked up again by the next pass.
    pub failed: Vec<(BookingId, BookingError)>,
}

/// Cancel every approved temporary booking whose confirmation deadline has
/// passed. Only listing the expired bookings can fail the whole pass.
pub async fn reap_expired(engine: &Engine) -> Result<ReapPass, BookingError> {
    let mut pass = ReapPass::default();
    for booking in engine.expired().await? {
        match engine.expire(booking.id).await {
            Ok(Some(release)) => {
                info!(
                    "reaped booking {} (rank {} freed)",
                    release.booking.id, release.freed_rank
                );
                pass.reaped.push(release.booking.id);
            }
            // Confirmed or cancelled since the listing
            Ok(None) => {}
            Err(e) => {
                metrics::counter!(observability::REAPER_FAILURES_TOTAL).increment(1);
                warn!("reaper could not expire booking {}: {e}", booking.id);
                pass.failed.push((booking.id, e));
            }
        }
    }
    Ok(pass)
}

/// Background task that periodically cancels expired temporary bookings.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match reap_expired(&engine).await {
            Ok(pass) if !pass.failed.is_empty() => warn!(
                "reaper pass left {} expired bookings behind ({} reaped)",
                pass.failed.len(),
                pass.reaped.len()
            ),
            Ok(_) => {}
            Err(e) => error!("reaper pass failed: {e}"),
        }
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if store.wal_appends_since_compact().await < threshold {
            continue;
        }
        if let Err(e) = store.compact_wal().await {
            error!("WAL compaction failed: {e}");
        }
    }
}
