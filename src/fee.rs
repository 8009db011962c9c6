//! Cancellation fees.
//!
//! Temporary bookings never pay. Confirmed bookings pay by how far away the
//! start is:
//!
//! | time until start            | fee  |
//! |-----------------------------|------|
//! | under one full day, or past | 100% |
//! | 1–3 days (rounded up)       | 80%  |
//! | 4–5 days (rounded up)       | 50%  |
//! | 6 days or more              | 0%   |

use crate::limits::DAY_MS;
use crate::model::{BookingType, Ms};

pub const FEE_SAME_DAY: u8 = 100;
pub const FEE_ONE_TO_THREE_DAYS: u8 = 80;
pub const FEE_FOUR_TO_FIVE_DAYS: u8 = 50;
pub const FEE_SIX_DAYS_OR_MORE: u8 = 0;

/// Whole days until `start`, rounded up. Zero or negative once `start` is reached.
pub fn days_until_ceil(start: Ms, now: Ms) -> i64 {
    let diff = start - now;
    if diff <= 0 {
        return diff.div_euclid(DAY_MS);
    }
    (diff + DAY_MS - 1) / DAY_MS
}

pub fn fee_percent(start: Ms, booking_type: BookingType, now: Ms) -> u8 {
    if booking_type == BookingType::Temporary {
        return 0;
    }
    if start - now < DAY_MS {
        return FEE_SAME_DAY;
    }
    match days_until_ceil(start, now) {
        d if d >= 6 => FEE_SIX_DAYS_OR_MORE,
        4..=5 => FEE_FOUR_TO_FIVE_DAYS,
        _ => FEE_ONE_TO_THREE_DAYS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::HOUR_MS;

    const NOW: Ms = 1_773_106_200_000;

    #[test]
    fn temporary_is_always_free() {
        for offset in [-DAY_MS, 0, HOUR_MS, 2 * DAY_MS, 30 * DAY_MS] {
            assert_eq!(fee_percent(NOW + offset, BookingType::Temporary, NOW), 0);
        }
    }

    #[test]
    fn confirmed_boundaries() {
        let fee = |offset| fee_percent(NOW + offset, BookingType::Confirmed, NOW);
        assert_eq!(fee(-HOUR_MS), 100); // past due
        assert_eq!(fee(0), 100);
        assert_eq!(fee(12 * HOUR_MS), 100);
        assert_eq!(fee(DAY_MS - 1), 100);
        assert_eq!(fee(DAY_MS), 80);
        assert_eq!(fee(3 * DAY_MS), 80);
        assert_eq!(fee(3 * DAY_MS + 1), 50); // rounds up to day 4
        assert_eq!(fee(5 * DAY_MS), 50);
        assert_eq!(fee(5 * DAY_MS + 1), 0); // rounds up to day 6
        assert_eq!(fee(6 * DAY_MS), 0);
        assert_eq!(fee(60 * DAY_MS), 0);
    }

    #[test]
    fn confirmed_fee_never_increases_with_lead_time() {
        let mut previous = u8::MAX;
        let mut offset = -2 * DAY_MS;
        while offset < 10 * DAY_MS {
            let fee = fee_percent(NOW + offset, BookingType::Confirmed, NOW);
            assert!(fee <= previous, "fee rose to {fee} at offset {offset}");
            previous = fee;
            offset += HOUR_MS / 2;
        }
    }

    #[test]
    fn ceil_days() {
        assert_eq!(days_until_ceil(NOW + 1, NOW), 1);
        assert_eq!(days_until_ceil(NOW + DAY_MS, NOW), 1);
        assert_eq!(days_until_ceil(NOW + DAY_MS + 1, NOW), 2);
        assert_eq!(days_until_ceil(NOW, NOW), 0);
        assert_eq!(days_until_ceil(NOW - 1, NOW), -1);
    }
}
