use crate::deadline;
use crate::limits::{MAX_BOOKING_DURATION_MS, MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;
use crate::rules::BookingRules;
use crate::store::{BOOKINGS_PARTITION, Item, StoreError};

use super::{BookingError, Engine, keep};

impl Engine {
    /// Every booking record, in creation order.
    pub(super) async fn bookings(&self) -> Result<Vec<Booking>, BookingError> {
        let items = self.timed(self.store.query(BOOKINGS_PARTITION)).await?;
        items
            .into_iter()
            .map(|(key, value)| match value.item {
                Item::Booking(booking) => Ok(booking),
                _ => Err(BookingError::from(StoreError::Corrupt(key))),
            })
            .collect()
    }

    pub async fn get(&self, actor: Actor, id: BookingId) -> Result<Booking, BookingError> {
        self.load_for(&actor, id).await.map(|(booking, _)| booking)
    }

    /// The owner's bookings, oldest first. Terminal bookings are included.
    pub async fn list_for_owner(&self, owner: UserId) -> Result<Vec<Booking>, BookingError> {
        Ok(self
            .bookings()
            .await?
            .into_iter()
            .filter(|b| b.owner == owner)
            .collect())
    }

    /// Who currently holds `span`, and whether one more holder fits.
    pub async fn keep_status(&self, span: Span) -> Result<KeepStatus, BookingError> {
        if span.end <= span.start {
            return Err(BookingError::InvalidInterval("end must be after start".into()));
        }
        if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
            return Err(BookingError::InvalidInterval("timestamp out of range".into()));
        }
        // Each day of the span is a partition read.
        if span.duration_ms() > MAX_BOOKING_DURATION_MS {
            return Err(BookingError::InvalidInterval("interval may not exceed 24 hours".into()));
        }
        let snapshot = self.snapshot(&[span]).await?;
        Ok(keep::keep_status(&span, &snapshot.entries))
    }

    /// Approved temporary bookings whose deadline is still ahead but at most
    /// `within_days` away, soonest first.
    pub async fn expiring_soon(
        &self,
        within_days: i64,
    ) -> Result<Vec<(Booking, DeadlineStatus)>, BookingError> {
        let now = self.now();
        let mut soon: Vec<(Booking, DeadlineStatus)> = self
            .bookings()
            .await?
            .into_iter()
            .filter(|b| b.booking_type == BookingType::Temporary && b.status == BookingStatus::Approved)
            .filter_map(|b| deadline::deadline_status(&b, now).map(|status| (b, status)))
            .filter(|(_, status)| !status.expired && status.days_left <= within_days)
            .collect();
        soon.sort_by_key(|(_, status)| status.deadline);
        Ok(soon)
    }

    /// Approved temporary bookings already past their deadline.
    pub async fn expired(&self) -> Result<Vec<Booking>, BookingError> {
        let now = self.now();
        Ok(self
            .bookings()
            .await?
            .into_iter()
            .filter(|b| deadline::is_expired(b, now))
            .collect())
    }

    pub fn rules(&self) -> &BookingRules {
        &self.config.rules
    }
}
