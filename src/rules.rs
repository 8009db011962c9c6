use chrono::Timelike;

use crate::clock::LocalCalendar;
use crate::engine::BookingError;
use crate::limits::*;
use crate::model::{Ms, Span};

/// Business rules a requested interval must satisfy before any store access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRules {
    pub min_duration_ms: Ms,
    /// Start and end must fall on multiples of this many minutes past the hour.
    pub grid_minutes: u32,
    /// How far ahead of now a booking must start.
    pub min_lead_ms: Ms,
    /// Local opening hour, inclusive.
    pub open_hour: u32,
    /// Local closing hour, exclusive; 24 means midnight.
    pub close_hour: u32,
    pub max_temporary_per_user: usize,
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            min_duration_ms: 2 * HOUR_MS,
            grid_minutes: 60,
            min_lead_ms: 2 * HOUR_MS,
            open_hour: 0,
            close_hour: 24,
            max_temporary_per_user: MAX_TEMPORARY_BOOKINGS_PER_USER,
        }
    }
}

impl BookingRules {
    fn always_open(&self) -> bool {
        self.open_hour == 0 && self.close_hour >= 24
    }

    pub fn validate_interval(
        &self,
        span: &Span,
        calendar: &LocalCalendar,
        now: Ms,
    ) -> Result<(), BookingError> {
        if span.end <= span.start {
            return Err(BookingError::InvalidInterval("end must be after start".into()));
        }
        if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
            return Err(BookingError::InvalidInterval("timestamp out of range".into()));
        }
        if span.duration_ms() < self.min_duration_ms {
            return Err(BookingError::InvalidInterval(format!(
                "booking must last at least {} minutes",
                self.min_duration_ms / MINUTE_MS
            )));
        }
        if span.duration_ms() > MAX_BOOKING_DURATION_MS {
            return Err(BookingError::InvalidInterval("booking may not exceed 24 hours".into()));
        }
        if span.start < now + self.min_lead_ms {
            return Err(BookingError::InvalidInterval(format!(
                "booking must start at least {} minutes from now",
                self.min_lead_ms / MINUTE_MS
            )));
        }

        let start = calendar.local_time(span.start);
        let end = calendar.local_time(span.end);
        let grid = self.grid_minutes.max(1);
        for t in [start, end] {
            if t.second() != 0 || t.nanosecond() != 0 || t.minute() % grid != 0 {
                return Err(BookingError::InvalidInterval(format!(
                    "start and end must be on a {grid}-minute grid"
                )));
            }
        }

        if !self.always_open() {
            let opens = self.open_hour * 60;
            let closes = self.close_hour.min(24) * 60;
            let start_min = start.hour() * 60 + start.minute();
            let mut end_min = end.hour() * 60 + end.minute();
            if end_min == 0 {
                end_min = 24 * 60;
            }
            let same_day = calendar.local_date(span.start) == calendar.local_date(span.end)
                || (end_min == 24 * 60
                    && calendar.local_date(span.start).succ_opt()
                        == Some(calendar.local_date(span.end)));
            if !same_day || start_min < opens || end_min > closes {
                return Err(BookingError::InvalidInterval(format!(
                    "outside business hours {:02}:00-{:02}:00",
                    self.open_hour, self.close_hour
                )));
            }
        }
        Ok(())
    }
}
