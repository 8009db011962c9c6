//! Keep-order resolution: who already holds an interval, and at what rank a
//! newcomer would join.

use crate::limits::MAX_KEEP_COUNT;
use crate::model::{BookingId, CalendarSlotEntry, KeepHolder, KeepStatus, Span};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub admit: bool,
    /// Rank the newcomer would take; `MAX_KEEP_COUNT + 1` when not admitted.
    pub rank: u8,
    pub reason: Option<&'static str>,
}

/// Active entries overlapping `span`, excluding `exclude`, in rank order
/// (ties by creation time, then id).
pub fn overlapping<'a>(
    span: &Span,
    entries: &'a [CalendarSlotEntry],
    exclude: Option<BookingId>,
) -> Vec<&'a CalendarSlotEntry> {
    let mut holders: Vec<&CalendarSlotEntry> = entries
        .iter()
        .filter(|e| e.status.is_active())
        .filter(|e| Some(e.booking_id) != exclude)
        .filter(|e| e.span.overlaps(span))
        .collect();
    holders.sort_by_key(|e| (e.rank, e.created_at, e.booking_id));
    holders
}

pub fn resolve(span: &Span, entries: &[CalendarSlotEntry], exclude: Option<BookingId>) -> Resolution {
    let count = overlapping(span, entries, exclude).len();
    if count >= MAX_KEEP_COUNT as usize {
        return Resolution {
            admit: false,
            rank: MAX_KEEP_COUNT + 1,
            reason: Some("maximum number of keep holders reached"),
        };
    }
    Resolution {
        admit: true,
        rank: count as u8 + 1,
        reason: None,
    }
}

pub fn keep_status(span: &Span, entries: &[CalendarSlotEntry]) -> KeepStatus {
    let holders: Vec<KeepHolder> = overlapping(span, entries, None)
        .into_iter()
        .map(|e| KeepHolder {
            booking_id: e.booking_id,
            owner: e.owner,
            rank: e.rank,
            status: e.status,
            booking_type: e.booking_type,
            span: e.span,
        })
        .collect();
    let taken = holders.len().min(MAX_KEEP_COUNT as usize) as u8;
    KeepStatus {
        available_keep_slots: MAX_KEEP_COUNT - taken,
        can_book: taken < MAX_KEEP_COUNT,
        holders,
    }
}
