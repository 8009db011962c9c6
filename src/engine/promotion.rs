use tracing::{error, info};

use crate::limits::MAX_TRANSACT_ITEMS;
use crate::model::*;
use crate::observability;
use crate::store::Condition;

use super::{BookingError, Engine, Snapshot, Txn, keep};

/// A promoted holder writes its booking and its slot mirror.
const OPS_PER_PROMOTION: usize = 2;
/// Follow-up chunks may also need one guard op per holder.
const FOLLOW_UP_CHUNK: usize = MAX_TRANSACT_ITEMS / (OPS_PER_PROMOTION + 1);

#[derive(Debug, Default)]
pub(super) struct PromotionPlan {
    /// Written by the same transaction that frees the rank.
    pub staged: Vec<Booking>,
    /// Did not fit; id and the rank it held when planned.
    pub deferred: Vec<(BookingId, u8)>,
}

/// Active holders of `span` ranked below `freed_rank`, in rank order.
pub fn candidates<'a>(
    span: &Span,
    freed_rank: u8,
    entries: &'a [CalendarSlotEntry],
    freed_id: BookingId,
) -> Vec<&'a CalendarSlotEntry> {
    keep::overlapping(span, entries, Some(freed_id))
        .into_iter()
        .filter(|e| e.rank > freed_rank)
        .collect()
}

fn promote(booking: &Booking, now: Ms) -> Booking {
    let mut next = booking.clone();
    next.rank = booking.rank.saturating_sub(1).max(1);
    next.updated_at = now;
    next
}

impl Engine {
    /// Stage as many promotions as fit into `txn`, which already carries
    /// the write vacating `freed`'s rank.
    pub(super) async fn stage_promotion(
        &self,
        txn: &mut Txn<'_>,
        freed: &Booking,
        snapshot: &Snapshot,
    ) -> Result<PromotionPlan, BookingError> {
        let now = self.now();
        let room = MAX_TRANSACT_ITEMS.saturating_sub(txn.len()) / OPS_PER_PROMOTION;
        let mut plan = PromotionPlan::default();
        for entry in candidates(&freed.span, freed.rank, &snapshot.entries, freed.id) {
            if plan.staged.len() >= room {
                plan.deferred.push((entry.booking_id, entry.rank));
                continue;
            }
            let (booking, version) = self.load(entry.booking_id).await?;
            if !booking.status.is_active() || booking.rank != entry.rank {
                // Record moved since the snapshot; the guard check would fail anyway.
                return Err(BookingError::TimeSlotConflict);
            }
            let promoted = promote(&booking, now);
            txn.put_booking(&promoted, Condition::VersionIs(version));
            txn.put_slot(&promoted);
            plan.staged.push(promoted);
        }
        Ok(plan)
    }

    /// Commit the deferred part of `plan` in ordered chunks, then announce
    /// everything that was promoted.
    pub(super) async fn finish_promotion(
        &self,
        plan: PromotionPlan,
    ) -> Result<Vec<Booking>, BookingError> {
        let mut promoted = plan.staged;
        let mut remaining = plan.deferred.as_slice();
        while !remaining.is_empty() {
            let (chunk, rest) = remaining.split_at(remaining.len().min(FOLLOW_UP_CHUNK));
            match self.commit_promotion_chunk(chunk).await {
                Ok(done) => promoted.extend(done),
                Err(e) => {
                    self.announce_promotions(&promoted);
                    let pending: Vec<BookingId> = remaining.iter().map(|(id, _)| *id).collect();
                    metrics::counter!(observability::PARTIAL_PROMOTIONS_TOTAL).increment(1);
                    error!(
                        "promotion stopped: {} promoted, {} pending: {e}",
                        promoted.len(),
                        pending.len()
                    );
                    return Err(BookingError::PartialPromotion {
                        promoted: promoted.iter().map(|b| b.id).collect(),
                        pending,
                        cause: e.to_string(),
                    });
                }
            }
            remaining = rest;
        }
        self.announce_promotions(&promoted);
        Ok(promoted)
    }

    async fn commit_promotion_chunk(
        &self,
        chunk: &[(BookingId, u8)],
    ) -> Result<Vec<Booking>, BookingError> {
        let now = self.now();
        let mut txn = self.txn();
        let mut done = Vec::with_capacity(chunk.len());
        for (id, planned_rank) in chunk {
            let (booking, version) = self.load(*id).await?;
            if !booking.status.is_active() || booking.rank != *planned_rank {
                continue;
            }
            let promoted = promote(&booking, now);
            txn.put_booking(&promoted, Condition::VersionIs(version));
            txn.put_slot(&promoted);
            done.push(promoted);
        }
        if !done.is_empty() {
            self.commit(txn).await?;
        }
        Ok(done)
    }

    fn announce_promotions(&self, promoted: &[Booking]) {
        if promoted.is_empty() {
            return;
        }
        metrics::counter!(observability::PROMOTIONS_TOTAL).increment(promoted.len() as u64);
        for booking in promoted {
            info!("booking {} promoted to rank {}", booking.id, booking.rank);
            self.notify.send(BookingEvent::Promoted {
                id: booking.id,
                from_rank: booking.rank + 1,
                to_rank: booking.rank,
            });
        }
    }
}
