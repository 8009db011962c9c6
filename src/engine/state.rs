//! Status × type transitions. Every function here checks first and returns a
//! new [`Booking`]; the input is never touched, so a refused transition has no
//! side effects.

use crate::deadline;
use crate::fee::fee_percent;
use crate::model::{Actor, Booking, BookingStatus, BookingType, Ms, UserId};

use super::BookingError;

pub(super) const EXPIRY_REASON: &str = "confirmation deadline passed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Approve {
        by: UserId,
        convert_to_confirmed: bool,
        admin_comment: Option<String>,
    },
    Reject {
        by: UserId,
        reason: String,
        admin_comment: Option<String>,
    },
    Cancel {
        by: Actor,
        reason: Option<String>,
    },
    /// Temporary → confirmed.
    Confirm,
    /// Cancellation by the reaper. Only valid while the booking is still an
    /// approved temporary past its deadline.
    Expire,
}

impl Transition {
    pub fn target_status(&self, current: BookingStatus) -> BookingStatus {
        match self {
            Transition::Approve { .. } => BookingStatus::Approved,
            Transition::Reject { .. } => BookingStatus::Rejected,
            Transition::Cancel { .. } | Transition::Expire => BookingStatus::Cancelled,
            Transition::Confirm => current,
        }
    }
}

pub fn status_allowed(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (Pending, Approved) | (Pending, Rejected) | (Pending, Cancelled) | (Approved, Cancelled)
    )
}

pub fn check(booking: &Booking, transition: &Transition, now: Ms) -> Result<(), BookingError> {
    let from = booking.status;
    match transition {
        Transition::Cancel { .. } => {
            if !status_allowed(from, BookingStatus::Cancelled) {
                return Err(BookingError::BookingCannotBeCancelled(from));
            }
        }
        Transition::Expire => {
            if !deadline::is_expired(booking, now) {
                return Err(BookingError::NotExpired(booking.id));
            }
        }
        Transition::Confirm => {
            if booking.booking_type != BookingType::Temporary || from != BookingStatus::Approved {
                return Err(BookingError::InvalidBookingType {
                    booking_type: booking.booking_type,
                    status: from,
                });
            }
        }
        other => {
            let to = other.target_status(from);
            if !status_allowed(from, to) {
                return Err(BookingError::InvalidTransition { from, to });
            }
        }
    }
    Ok(())
}

pub fn apply(booking: &Booking, transition: Transition, now: Ms) -> Result<Booking, BookingError> {
    check(booking, &transition, now)?;
    let mut next = booking.clone();
    next.updated_at = now;
    match transition {
        Transition::Approve {
            by,
            convert_to_confirmed,
            admin_comment,
        } => {
            next.status = BookingStatus::Approved;
            next.approved_by = Some(by);
            next.approved_at = Some(now);
            if admin_comment.is_some() {
                next.admin_comment = admin_comment;
            }
            if convert_to_confirmed && next.booking_type == BookingType::Temporary {
                confirm(&mut next, now);
            }
        }
        Transition::Reject {
            by,
            reason,
            admin_comment,
        } => {
            next.status = BookingStatus::Rejected;
            next.rejected_by = Some(by);
            next.rejected_at = Some(now);
            next.rejection_reason = Some(reason);
            if admin_comment.is_some() {
                next.admin_comment = admin_comment;
            }
            next.confirmation_deadline = None;
        }
        Transition::Cancel { by, reason } => {
            next.status = BookingStatus::Cancelled;
            next.cancellation_fee_percent = fee_percent(next.span.start, next.booking_type, now);
            next.cancelled_by = Some(by);
            next.cancelled_at = Some(now);
            next.cancellation_reason = reason;
            next.confirmation_deadline = None;
        }
        Transition::Expire => {
            next.status = BookingStatus::Cancelled;
            next.cancellation_fee_percent = 0;
            next.cancelled_by = Some(Actor::System);
            next.cancelled_at = Some(now);
            next.cancellation_reason = Some(EXPIRY_REASON.to_string());
            next.confirmation_deadline = None;
        }
        Transition::Confirm => confirm(&mut next, now),
    }
    Ok(next)
}

fn confirm(booking: &mut Booking, now: Ms) {
    booking.booking_type = BookingType::Confirmed;
    booking.confirmation_deadline = None;
    booking.cancellation_fee_percent = fee_percent(booking.span.start, BookingType::Confirmed, now);
}

pub fn ensure_updatable(booking: &Booking) -> Result<(), BookingError> {
    if booking.status != BookingStatus::Pending {
        return Err(BookingError::BookingCannotBeUpdated(booking.status));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::DAY_MS;
    use crate::model::Span;
    use ulid::Ulid;

    const NOW: Ms = 1_773_106_200_000;

    fn booking(status: BookingStatus, booking_type: BookingType) -> Booking {
        Booking {
            id: Ulid::new(),
            owner: Ulid::new(),
            span: Span::new(NOW + 5 * DAY_MS, NOW + 5 * DAY_MS + 7_200_000),
            booking_type,
            status,
            rank: 1,
            confirmation_deadline: (booking_type == BookingType::Temporary).then_some(NOW + DAY_MS),
            cancellation_fee_percent: 0,
            label: None,
            created_at: NOW,
            updated_at: NOW,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            rejection_reason: None,
            admin_comment: None,
            cancelled_by: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    fn approve() -> Transition {
        Transition::Approve {
            by: Ulid::new(),
            convert_to_confirmed: false,
            admin_comment: None,
        }
    }

    fn cancel() -> Transition {
        Transition::Cancel {
            by: Actor::System,
            reason: None,
        }
    }

    #[test]
    fn transition_table() {
        use BookingStatus::*;
        let all = [Pending, Approved, Rejected, Cancelled];
        for from in all {
            for to in all {
                let expected = matches!(
                    (from, to),
                    (Pending, Approved) | (Pending, Rejected) | (Pending, Cancelled) | (Approved, Cancelled)
                );
                assert_eq!(status_allowed(from, to), expected, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn approve_only_from_pending() {
        let b = booking(BookingStatus::Approved, BookingType::Confirmed);
        assert_eq!(
            apply(&b, approve(), NOW),
            Err(BookingError::InvalidTransition {
                from: BookingStatus::Approved,
                to: BookingStatus::Approved
            })
        );
        let b = booking(BookingStatus::Pending, BookingType::Confirmed);
        let approved = apply(&b, approve(), NOW).unwrap();
        assert_eq!(approved.status, BookingStatus::Approved);
        assert!(approved.approved_at.is_some());
    }

    #[test]
    fn approve_can_convert_temporary() {
        let b = booking(BookingStatus::Pending, BookingType::Temporary);
        let t = Transition::Approve {
            by: Ulid::new(),
            convert_to_confirmed: true,
            admin_comment: Some("ok".into()),
        };
        let approved = apply(&b, t, NOW).unwrap();
        assert_eq!(approved.booking_type, BookingType::Confirmed);
        assert_eq!(approved.confirmation_deadline, None);
        assert_eq!(approved.cancellation_fee_percent, 50);
        assert_eq!(approved.admin_comment.as_deref(), Some("ok"));
    }

    #[test]
    fn confirm_requires_approved_temporary() {
        for (status, kind) in [
            (BookingStatus::Pending, BookingType::Temporary),
            (BookingStatus::Approved, BookingType::Confirmed),
            (BookingStatus::Cancelled, BookingType::Temporary),
        ] {
            let b = booking(status, kind);
            assert!(matches!(
                apply(&b, Transition::Confirm, NOW),
                Err(BookingError::InvalidBookingType { .. })
            ));
        }
        let b = booking(BookingStatus::Approved, BookingType::Temporary);
        let confirmed = apply(&b, Transition::Confirm, NOW).unwrap();
        assert_eq!(confirmed.booking_type, BookingType::Confirmed);
        assert_eq!(confirmed.status, BookingStatus::Approved);
        assert_eq!(confirmed.confirmation_deadline, None);
        assert_eq!(confirmed.cancellation_fee_percent, 50);
    }

    #[test]
    fn cancel_freezes_fee_and_clears_deadline() {
        let b = booking(BookingStatus::Approved, BookingType::Temporary);
        let cancelled = apply(&b, cancel(), NOW).unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.cancellation_fee_percent, 0);
        assert_eq!(cancelled.confirmation_deadline, None);

        let b = booking(BookingStatus::Pending, BookingType::Confirmed);
        assert_eq!(apply(&b, cancel(), NOW).unwrap().cancellation_fee_percent, 50);
    }

    #[test]
    fn terminal_states_are_final() {
        for status in [BookingStatus::Rejected, BookingStatus::Cancelled] {
            let b = booking(status, BookingType::Confirmed);
            assert_eq!(
                apply(&b, cancel(), NOW),
                Err(BookingError::BookingCannotBeCancelled(status))
            );
            assert!(apply(&b, approve(), NOW).is_err());
            assert!(ensure_updatable(&b).is_err());
        }
    }

    #[test]
    fn refused_transition_leaves_input_untouched() {
        let b = booking(BookingStatus::Cancelled, BookingType::Confirmed);
        let before = b.clone();
        let _ = apply(&b, cancel(), NOW);
        assert_eq!(b, before);
    }

    #[test]
    fn expire_rechecks_the_deadline_on_the_record() {
        let later = NOW + 2 * DAY_MS;
        let b = booking(BookingStatus::Approved, BookingType::Temporary);
        assert_eq!(
            apply(&b, Transition::Expire, NOW),
            Err(BookingError::NotExpired(b.id))
        );

        let expired = apply(&b, Transition::Expire, later).unwrap();
        assert_eq!(expired.status, BookingStatus::Cancelled);
        assert_eq!(expired.cancelled_by, Some(Actor::System));
        assert_eq!(expired.cancellation_fee_percent, 0);
        assert_eq!(expired.cancellation_reason.as_deref(), Some(EXPIRY_REASON));

        // Confirmed in the meantime: no longer the reaper's business.
        let confirmed = apply(&b, Transition::Confirm, NOW).unwrap();
        assert_eq!(
            apply(&confirmed, Transition::Expire, later),
            Err(BookingError::NotExpired(b.id))
        );
        let pending = booking(BookingStatus::Pending, BookingType::Temporary);
        assert!(apply(&pending, Transition::Expire, later).is_err());
    }
}
