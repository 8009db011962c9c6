use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

pub type BookingId = Ulid;
pub type UserId = Ulid;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl BookingStatus {
    /// Pending and approved bookings hold a rank and a calendar slot.
    pub fn is_active(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Approved)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingType {
    /// Needs explicit confirmation before its deadline.
    Temporary,
    Confirmed,
}

impl BookingType {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingType::Temporary => "temporary",
            BookingType::Confirmed => "confirmed",
        }
    }
}

impl std::fmt::Display for BookingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The reservation record. Never physically deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub owner: UserId,
    pub span: Span,
    pub booking_type: BookingType,
    pub status: BookingStatus,
    /// 1 = primary holder, 2..=3 = kept.
    pub rank: u8,
    pub confirmation_deadline: Option<Ms>,
    pub cancellation_fee_percent: u8,
    pub label: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<Ms>,
    pub rejected_by: Option<UserId>,
    pub rejected_at: Option<Ms>,
    pub rejection_reason: Option<String>,
    pub admin_comment: Option<String>,
    pub cancelled_by: Option<Actor>,
    pub cancelled_at: Option<Ms>,
    pub cancellation_reason: Option<String>,
}

impl Booking {
    pub fn is_kept(&self) -> bool {
        self.rank > 1
    }

    /// The calendar-index mirror of this booking.
    pub fn slot_entry(&self, date: NaiveDate) -> CalendarSlotEntry {
        CalendarSlotEntry {
            booking_id: self.id,
            owner: self.owner,
            date,
            span: self.span,
            status: self.status,
            booking_type: self.booking_type,
            rank: self.rank,
            created_at: self.created_at,
        }
    }
}

/// Secondary index entry: exists only while its booking is pending or approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSlotEntry {
    pub booking_id: BookingId,
    pub owner: UserId,
    /// Local date of `span.start`; selects the slot partition.
    pub date: NaiveDate,
    pub span: Span,
    pub status: BookingStatus,
    pub booking_type: BookingType,
    pub rank: u8,
    pub created_at: Ms,
}

/// Who is performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    User(UserId),
    Admin(UserId),
    /// Background processes such as the expiry reaper.
    System,
}

impl Actor {
    /// Users only reach their own bookings; admins and the system reach all.
    pub fn can_access(&self, booking: &Booking) -> bool {
        match self {
            Actor::User(id) => *id == booking.owner,
            Actor::Admin(_) | Actor::System => true,
        }
    }
}

// ── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBooking {
    pub span: Span,
    pub booking_type: BookingType,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTimes {
    pub span: Span,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    /// Approve a temporary booking straight into a confirmed one.
    pub convert_to_confirmed: bool,
    pub admin_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: String,
    pub admin_comment: Option<String>,
}

// ── Results ──────────────────────────────────────────────────────

/// Outcome of an operation that vacated a rank: cancel, reject or move.
/// The operation itself is committed whenever this value is returned;
/// `promotion` reports how re-ranking the remaining holders went.
#[derive(Debug)]
pub struct Release {
    pub booking: Booking,
    pub freed_rank: u8,
    pub promotion: Result<Vec<Booking>, crate::engine::BookingError>,
}

impl Release {
    pub fn promoted(&self) -> &[Booking] {
        match &self.promotion {
            Ok(promoted) => promoted,
            Err(_) => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepHolder {
    pub booking_id: BookingId,
    pub owner: UserId,
    pub rank: u8,
    pub status: BookingStatus,
    pub booking_type: BookingType,
    pub span: Span,
}

/// Read-only view of who holds an interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepStatus {
    pub holders: Vec<KeepHolder>,
    pub available_keep_slots: u8,
    pub can_book: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineStatus {
    pub deadline: Ms,
    pub expired: bool,
    /// Whole days until the deadline, rounded up; 0 once expired.
    pub days_left: i64,
}

/// What happened to a booking, broadcast after each commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingEvent {
    Created { id: BookingId, owner: UserId, span: Span, rank: u8 },
    Moved { id: BookingId, span: Span, rank: u8 },
    Approved { id: BookingId, by: UserId },
    Rejected { id: BookingId, by: UserId },
    Confirmed { id: BookingId },
    Cancelled { id: BookingId, fee_percent: u8 },
    Promoted { id: BookingId, from_rank: u8, to_rank: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn span_single_ms_overlap() {
        let a = Span::new(100, 201);
        let b = Span::new(200, 300);
        assert!(a.overlaps(&b));
    }

    #[test]
    fn status_activity() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Approved.is_active());
        assert!(BookingStatus::Rejected.is_terminal());
        assert!(BookingStatus::Cancelled.is_terminal());
    }

    #[test]
    fn actor_access() {
        let owner = Ulid::new();
        let booking = Booking {
            id: Ulid::new(),
            owner,
            span: Span::new(0, 10),
            booking_type: BookingType::Confirmed,
            status: BookingStatus::Pending,
            rank: 1,
            confirmation_deadline: None,
            cancellation_fee_percent: 0,
            label: None,
            created_at: 0,
            updated_at: 0,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            admin_comment: None,
            cancelled_by: None,
            cancelled_at: None,
            cancellation_reason: None,
        };
        assert!(Actor::User(owner).can_access(&booking));
        assert!(!Actor::User(Ulid::new()).can_access(&booking));
        assert!(Actor::Admin(Ulid::new()).can_access(&booking));
        assert!(Actor::System.can_access(&booking));
    }

    #[test]
    fn booking_serialization_roundtrip() {
        let event = BookingEvent::Promoted {
            id: Ulid::new(),
            from_rank: 3,
            to_rank: 2,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: BookingEvent = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
