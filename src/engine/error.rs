use crate::model::{BookingId, BookingStatus, BookingType};
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    InvalidInterval(String),
    /// Three active holders already overlap the requested interval.
    KeepLimitExceeded,
    /// The optimistic commit kept losing races until the retry budget ran out.
    TimeSlotConflict,
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    InvalidBookingType {
        booking_type: BookingType,
        status: BookingStatus,
    },
    BookingCannotBeUpdated(BookingStatus),
    BookingCannotBeCancelled(BookingStatus),
    BookingNotFound(BookingId),
    /// Not an approved temporary booking past its deadline (any more).
    NotExpired(BookingId),
    StoreUnavailable(String),
    /// Some promotion chunks committed, the rest did not.
    PartialPromotion {
        promoted: Vec<BookingId>,
        pending: Vec<BookingId>,
        cause: String,
    },
    LimitExceeded(&'static str),
    InvalidRequest(&'static str),
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::InvalidInterval(msg) => write!(f, "invalid interval: {msg}"),
            BookingError::KeepLimitExceeded => {
                write!(f, "time slot already has the maximum number of holders")
            }
            BookingError::TimeSlotConflict => {
                write!(f, "time slot changed concurrently, please retry")
            }
            BookingError::InvalidTransition { from, to } => {
                write!(f, "cannot change status from {from} to {to}")
            }
            BookingError::InvalidBookingType {
                booking_type,
                status,
            } => write!(f, "cannot confirm a {status} {booking_type} booking"),
            BookingError::BookingCannotBeUpdated(status) => {
                write!(f, "booking is {status} and can no longer be updated")
            }
            BookingError::BookingCannotBeCancelled(status) => {
                write!(f, "booking is {status} and cannot be cancelled")
            }
            BookingError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            BookingError::NotExpired(id) => {
                write!(f, "booking {id} is not past its confirmation deadline")
            }
            BookingError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
            BookingError::PartialPromotion {
                promoted,
                pending,
                cause,
            } => write!(
                f,
                "promotion incomplete: {} promoted, {} pending: {cause}",
                promoted.len(),
                pending.len()
            ),
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl BookingError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BookingError::InvalidInterval(_) => "invalid_interval",
            BookingError::KeepLimitExceeded => "keep_limit_exceeded",
            BookingError::TimeSlotConflict => "time_slot_conflict",
            BookingError::InvalidTransition { .. } => "invalid_transition",
            BookingError::InvalidBookingType { .. } => "invalid_booking_type",
            BookingError::BookingCannotBeUpdated(_) => "cannot_be_updated",
            BookingError::BookingCannotBeCancelled(_) => "cannot_be_cancelled",
            BookingError::BookingNotFound(_) => "not_found",
            BookingError::NotExpired(_) => "not_expired",
            BookingError::StoreUnavailable(_) => "store_unavailable",
            BookingError::PartialPromotion { .. } => "partial_promotion",
            BookingError::LimitExceeded(_) => "limit_exceeded",
            BookingError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl std::error::Error for BookingError {}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ConditionFailed { .. } => BookingError::TimeSlotConflict,
            other => BookingError::StoreUnavailable(other.to_string()),
        }
    }
}
