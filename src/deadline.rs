//! Confirmation deadlines and reminder timetables for temporary bookings.
//!
//! Everything here is a pure function of the booking's start and "now". The
//! resulting [`Schedule`] is handed to an external timer, which is expected to
//! call back into the expiry reaper when the auto-cancel entry fires.

use serde::{Deserialize, Serialize};

use crate::clock::LocalCalendar;
use crate::fee::days_until_ceil;
use crate::limits::*;
use crate::model::{Booking, BookingId, BookingStatus, BookingType, DeadlineStatus, Ms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Purpose {
    /// 10 days before the start date.
    FirstReminder,
    /// 8 days before the start date.
    SecondReminder,
    /// On the deadline itself.
    DeadlineReminder,
    AutoCancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledAction {
    pub at: Ms,
    pub purpose: Purpose,
    pub booking_id: BookingId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub booking_id: BookingId,
    pub confirmation_deadline: Ms,
    pub actions: Vec<ScheduledAction>,
}

impl Schedule {
    pub fn auto_cancel_at(&self) -> Option<Ms> {
        self.actions
            .iter()
            .find(|a| a.purpose == Purpose::AutoCancel)
            .map(|a| a.at)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeadlineScheduler {
    calendar: LocalCalendar,
}

impl DeadlineScheduler {
    pub fn new(calendar: LocalCalendar) -> Self {
        Self { calendar }
    }

    /// 18:00 local time, seven calendar days before the start date.
    pub fn confirmation_deadline(&self, start: Ms) -> Ms {
        self.calendar
            .days_before_at_hour(start, CONFIRMATION_DEADLINE_DAYS, DEADLINE_LOCAL_HOUR)
    }

    /// Reminders that are still in the future, plus the auto-cancel entry
    /// one hour after the deadline. Entries are in chronological order.
    pub fn notification_schedule(&self, booking_id: BookingId, start: Ms, now: Ms) -> Schedule {
        let deadline = self.confirmation_deadline(start);
        let candidates = [
            (
                self.calendar
                    .days_before_at_hour(start, FIRST_REMINDER_DAYS, DEADLINE_LOCAL_HOUR),
                Purpose::FirstReminder,
            ),
            (
                self.calendar
                    .days_before_at_hour(start, SECOND_REMINDER_DAYS, DEADLINE_LOCAL_HOUR),
                Purpose::SecondReminder,
            ),
            (deadline, Purpose::DeadlineReminder),
        ];

        let mut actions: Vec<ScheduledAction> = candidates
            .into_iter()
            .filter(|(at, _)| *at > now)
            .map(|(at, purpose)| ScheduledAction {
                at,
                purpose,
                booking_id,
            })
            .collect();
        actions.push(ScheduledAction {
            at: deadline + AUTO_CANCEL_GRACE_MS,
            purpose: Purpose::AutoCancel,
            booking_id,
        });

        Schedule {
            booking_id,
            confirmation_deadline: deadline,
            actions,
        }
    }

    /// Schedule for a booking that should have timers armed, if any.
    pub fn schedule_for(&self, booking: &Booking, now: Ms) -> Option<Schedule> {
        if booking.booking_type != BookingType::Temporary || booking.status != BookingStatus::Approved {
            return None;
        }
        Some(self.notification_schedule(booking.id, booking.span.start, now))
    }
}

/// `None` for bookings without a deadline.
pub fn deadline_status(booking: &Booking, now: Ms) -> Option<DeadlineStatus> {
    let deadline = booking.confirmation_deadline?;
    let expired = now > deadline;
    Some(DeadlineStatus {
        deadline,
        expired,
        days_left: if expired { 0 } else { days_until_ceil(deadline, now) },
    })
}

/// True once an unconfirmed, approved temporary booking is past its deadline.
pub fn is_expired(booking: &Booking, now: Ms) -> bool {
    booking.booking_type == BookingType::Temporary
        && booking.status == BookingStatus::Approved
        && booking.confirmation_deadline.is_some_and(|d| now > d)
}
