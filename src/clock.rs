use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

use crate::model::Ms;

/// Source of "now" for every time-dependent rule.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }
}

/// Conversions between instants and the studio's local wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCalendar {
    offset: FixedOffset,
}

impl Default for LocalCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl LocalCalendar {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// `None` if the offset is not within ±24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn local(&self, ms: Ms) -> DateTime<FixedOffset> {
        let utc = DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default();
        utc.with_timezone(&self.offset)
    }

    pub fn local_date(&self, ms: Ms) -> NaiveDate {
        self.local(ms).date_naive()
    }

    pub fn local_time(&self, ms: Ms) -> NaiveTime {
        self.local(ms).time()
    }

    /// Instant of `hour:00` local time on `date`.
    pub fn at_local_hour(&self, date: NaiveDate, hour: u32) -> Ms {
        let naive = date
            .and_hms_opt(hour.min(23), 0, 0)
            .unwrap_or_else(|| date.and_time(NaiveTime::MIN));
        // A fixed offset has exactly one mapping for every local time.
        self.offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| naive.and_utc().timestamp_millis())
    }

    /// Local `hour:00` on the date `days` before the local date of `ms`.
    pub fn days_before_at_hour(&self, ms: Ms, days: i64, hour: u32) -> Ms {
        let date = self.local_date(ms) - Duration::days(days);
        self.at_local_hour(date, hour)
    }
}
