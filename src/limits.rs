use crate::model::Ms;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Maximum concurrent holders (primary + two keeps) per overlapping interval.
pub const MAX_KEEP_COUNT: u8 = 3;

/// Items a single store transaction may carry.
pub const MAX_TRANSACT_ITEMS: usize = 25;

/// Bookings never span more than a day, so an overlap search only needs the
/// day before the start date through the end date.
pub const MAX_BOOKING_DURATION_MS: Ms = DAY_MS;

pub const MAX_LABEL_LEN: usize = 1024;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_BULK_IDS: usize = 100;

// 2000-01-01 .. 2100-01-01
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Days before the start date at which the confirmation deadline falls.
pub const CONFIRMATION_DEADLINE_DAYS: i64 = 7;
pub const FIRST_REMINDER_DAYS: i64 = 10;
pub const SECOND_REMINDER_DAYS: i64 = 8;
/// Local hour of day used for the deadline and for both reminders.
pub const DEADLINE_LOCAL_HOUR: u32 = 18;
/// Grace between the deadline and the automatic cancellation.
pub const AUTO_CANCEL_GRACE_MS: Ms = HOUR_MS;

pub const MAX_TEMPORARY_BOOKINGS_PER_USER: usize = 10;
