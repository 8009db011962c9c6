//! Keyed, transactional storage for bookings and the calendar-slot index.
//!
//! Items live under a `(partition, sort)` key. Bookings share the
//! [`BOOKINGS_PARTITION`]; slot entries and the per-date guard live in a
//! partition per local date:
//!
//! ```text
//! BOOKINGS                  / <booking-id>
//! SLOT#<resource>#<date>    / TIME#<start>#<end>#<booking-id>
//! SLOT#<resource>#<date>    / GUARD
//! ```
//!
//! Every write goes through [`TimeSlotStore::transact_write`]: all ops apply or
//! none do, and each op may carry a [`Condition`] checked at commit time.

mod memory;

pub use memory::{MemoryStore, wal_path};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::clock::LocalCalendar;
use crate::limits::MAX_TRANSACT_ITEMS;
use crate::model::{Booking, BookingId, CalendarSlotEntry};

pub const BOOKINGS_PARTITION: &str = "BOOKINGS";
pub const GUARD_SORT_KEY: &str = "GUARD";
const SLOT_PREFIX: &str = "SLOT#";
const TIME_PREFIX: &str = "TIME#";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub partition: String,
    pub sort: String,
}

impl Key {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }

    pub fn booking(id: BookingId) -> Self {
        Self::new(BOOKINGS_PARTITION, id.to_string())
    }

    pub fn slot_partition(resource: &str, date: NaiveDate) -> String {
        format!("{SLOT_PREFIX}{resource}#{}", date.format("%Y-%m-%d"))
    }

    pub fn slot(resource: &str, calendar: &LocalCalendar, entry: &CalendarSlotEntry) -> Self {
        let start = calendar.local_time(entry.span.start).format("%H:%M:%S");
        let end = calendar.local_time(entry.span.end).format("%H:%M:%S");
        Self::new(
            Self::slot_partition(resource, entry.date),
            format!("{TIME_PREFIX}{start}#{end}#{}", entry.booking_id),
        )
    }

    pub fn guard(resource: &str, date: NaiveDate) -> Self {
        Self::new(Self::slot_partition(resource, date), GUARD_SORT_KEY)
    }

    pub fn is_guard(&self) -> bool {
        self.sort == GUARD_SORT_KEY
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.partition, self.sort)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Item {
    Booking(Booking),
    Slot(CalendarSlotEntry),
    /// Version-only marker bumped by every write that changes a date's rank set.
    Guard,
}

/// An item as stored: `version` starts at 1 and increases on every put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned {
    pub item: Item,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Exists,
    NotExists,
    VersionIs(u64),
}

impl Condition {
    /// Condition matching the state that was observed: absent or at `version`.
    pub fn observed(version: Option<u64>) -> Self {
        match version {
            Some(v) => Condition::VersionIs(v),
            None => Condition::NotExists,
        }
    }

    pub fn holds(&self, current: Option<&Versioned>) -> bool {
        match (self, current) {
            (Condition::Exists, current) => current.is_some(),
            (Condition::NotExists, current) => current.is_none(),
            (Condition::VersionIs(v), Some(current)) => current.version == *v,
            (Condition::VersionIs(_), None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        key: Key,
        item: Item,
        condition: Option<Condition>,
    },
    Delete {
        key: Key,
        condition: Option<Condition>,
    },
    /// Assert a condition without writing.
    Check { key: Key, condition: Condition },
}

impl WriteOp {
    pub fn put(key: Key, item: Item) -> Self {
        WriteOp::Put {
            key,
            item,
            condition: None,
        }
    }

    pub fn put_if(key: Key, item: Item, condition: Condition) -> Self {
        WriteOp::Put {
            key,
            item,
            condition: Some(condition),
        }
    }

    pub fn delete_if(key: Key, condition: Condition) -> Self {
        WriteOp::Delete {
            key,
            condition: Some(condition),
        }
    }

    pub fn key(&self) -> &Key {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key, .. } | WriteOp::Check { key, .. } => {
                key
            }
        }
    }

    pub fn condition(&self) -> Option<Condition> {
        match self {
            WriteOp::Put { condition, .. } | WriteOp::Delete { condition, .. } => *condition,
            WriteOp::Check { condition, .. } => Some(*condition),
        }
    }
}

/// A committed mutation as recorded in the WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppliedOp {
    Put { key: Key, value: Versioned },
    Delete { key: Key },
}

/// The WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Record {
    Commit(Vec<AppliedOp>),
    /// Full state written by compaction; replaces everything before it.
    Snapshot(Vec<(Key, Versioned)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The op at `index` found its precondition false at commit time.
    ConditionFailed { index: usize, key: Key },
    TooManyItems(usize),
    DuplicateKey(Key),
    Unavailable(String),
    /// The deadline passed before the transaction was validated. Nothing
    /// was applied.
    Timeout,
    /// An item decoded to something other than what its key promises.
    Corrupt(Key),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::ConditionFailed { index, key } => {
                write!(f, "condition failed for op {index} on {key}")
            }
            StoreError::TooManyItems(n) => {
                write!(f, "transaction has {n} items, limit is {MAX_TRANSACT_ITEMS}")
            }
            StoreError::DuplicateKey(key) => write!(f, "key {key} appears twice in one transaction"),
            StoreError::Unavailable(e) => write!(f, "store unavailable: {e}"),
            StoreError::Timeout => write!(f, "transaction not validated before its deadline"),
            StoreError::Corrupt(key) => write!(f, "unexpected item at {key}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[async_trait]
pub trait TimeSlotStore: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Option<Versioned>, StoreError>;

    /// All items under `partition`, ordered by sort key.
    async fn query(&self, partition: &str) -> Result<Vec<(Key, Versioned)>, StoreError>;

    /// Apply every op atomically, or none of them.
    async fn transact_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    /// Like [`transact_write`](Self::transact_write), giving up with
    /// [`StoreError::Timeout`] if the ops are not validated by `deadline`.
    /// A transaction that validated in time is always carried through, so
    /// `Timeout` means nothing was applied.
    async fn transact_write_by(
        &self,
        ops: Vec<WriteOp>,
        deadline: tokio::time::Instant,
    ) -> Result<(), StoreError> {
        if tokio::time::Instant::now() >= deadline {
            return Err(StoreError::Timeout);
        }
        self.transact_write(ops).await
    }

    async fn put(&self, key: Key, item: Item, condition: Option<Condition>) -> Result<(), StoreError> {
        self.transact_write(vec![WriteOp::Put {
            key,
            item,
            condition,
        }])
        .await
    }

    async fn delete(&self, key: Key, condition: Option<Condition>) -> Result<(), StoreError> {
        self.transact_write(vec![WriteOp::Delete { key, condition }]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookingStatus, BookingType, Span};
    use ulid::Ulid;

    #[test]
    fn slot_key_layout() {
        let calendar = LocalCalendar::utc();
        let id = Ulid::new();
        // 2026-03-10 10:00 .. 12:00 UTC
        let start = 1_773_136_800_000;
        let entry = CalendarSlotEntry {
            booking_id: id,
            owner: Ulid::new(),
            date: calendar.local_date(start),
            span: Span::new(start, start + 2 * 3_600_000),
            status: BookingStatus::Pending,
            booking_type: BookingType::Confirmed,
            rank: 1,
            created_at: 0,
        };
        let key = Key::slot("studio", &calendar, &entry);
        assert_eq!(key.partition, "SLOT#studio#2026-03-10");
        assert_eq!(key.sort, format!("TIME#10:00:00#12:00:00#{id}"));
        assert!(!key.is_guard());
        assert!(Key::guard("studio", entry.date).is_guard());
    }

    #[test]
    fn condition_semantics() {
        let v = Versioned {
            item: Item::Guard,
            version: 3,
        };
        assert!(Condition::Exists.holds(Some(&v)));
        assert!(!Condition::Exists.holds(None));
        assert!(Condition::NotExists.holds(None));
        assert!(!Condition::NotExists.holds(Some(&v)));
        assert!(Condition::VersionIs(3).holds(Some(&v)));
        assert!(!Condition::VersionIs(2).holds(Some(&v)));
        assert!(!Condition::VersionIs(3).holds(None));
        assert_eq!(Condition::observed(None), Condition::NotExists);
        assert_eq!(Condition::observed(Some(7)), Condition::VersionIs(7));
    }
}
