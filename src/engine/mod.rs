//! The booking coordinator.
//!
//! Every write follows the same optimistic shape: read a [`Snapshot`] of the
//! slot partitions the interval can touch, decide ranks from it, then commit
//! one transaction conditioned on the guard versions that were read and on
//! the versions of every booking record it rewrites. A lost race surfaces as
//! a failed condition and the whole attempt is redone from the read.

/// Re-run `$attempt` while it loses optimistic races, up to the configured
/// budget. Each evaluation of `$attempt` must start from a fresh read.
macro_rules! with_retries {
    ($engine:expr, $op:expr, $attempt:expr) => {{
        let mut attempt: u32 = 1;
        loop {
            match $attempt.await {
                Err(BookingError::TimeSlotConflict)
                    if attempt < $engine.config.max_commit_attempts =>
                {
                    $engine.pause_before_retry($op, attempt).await;
                    attempt += 1;
                }
                Err(BookingError::TimeSlotConflict) => {
                    tracing::warn!("{}: gave up after {attempt} conflicting attempts", $op);
                    break Err(BookingError::TimeSlotConflict);
                }
                other => break other,
            }
        }
    }};
}

mod error;
mod keep;
mod mutations;
mod promotion;
mod queries;
mod state;

pub use error::BookingError;
pub use keep::{Resolution, keep_status, overlapping, resolve};
pub use state::{Transition, status_allowed};

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::warn;

use crate::clock::{Clock, LocalCalendar};
use crate::config::Config;
use crate::deadline::DeadlineScheduler;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::schedule::ScheduleSink;
use crate::store::{Condition, Item, Key, StoreError, TimeSlotStore, Versioned, WriteOp};

pub struct Engine {
    store: Arc<dyn TimeSlotStore>,
    clock: Arc<dyn Clock>,
    config: Config,
    scheduler: DeadlineScheduler,
    sink: Arc<dyn ScheduleSink>,
    pub notify: Arc<NotifyHub>,
}

/// Slot entries and guard versions of a run of local dates, as read.
#[derive(Debug, Default)]
pub(crate) struct Snapshot {
    pub entries: Vec<CalendarSlotEntry>,
    guards: BTreeMap<NaiveDate, Option<u64>>,
}

#[derive(Debug, Clone, Copy)]
struct GuardUse {
    condition: Option<Condition>,
    bump: bool,
}

/// Builder for one store transaction. Slot writes bump their date's guard;
/// observed guards that are not bumped become plain checks.
pub(crate) struct Txn<'a> {
    resource: &'a str,
    calendar: LocalCalendar,
    ops: Vec<WriteOp>,
    guards: BTreeMap<NaiveDate, GuardUse>,
}

impl Txn<'_> {
    fn guard(&mut self, date: NaiveDate) -> &mut GuardUse {
        self.guards.entry(date).or_insert(GuardUse {
            condition: None,
            bump: false,
        })
    }

    fn observe(&mut self, snapshot: &Snapshot) {
        for (date, version) in &snapshot.guards {
            self.guard(*date).condition = Some(Condition::observed(*version));
        }
    }

    fn slot(&self, booking: &Booking) -> (NaiveDate, Key, CalendarSlotEntry) {
        let date = self.calendar.local_date(booking.span.start);
        let entry = booking.slot_entry(date);
        let key = Key::slot(self.resource, &self.calendar, &entry);
        (date, key, entry)
    }

    fn put_booking(&mut self, booking: &Booking, condition: Condition) {
        self.ops.push(WriteOp::put_if(
            Key::booking(booking.id),
            Item::Booking(booking.clone()),
            condition,
        ));
    }

    fn put_slot(&mut self, booking: &Booking) {
        let (date, key, entry) = self.slot(booking);
        self.ops.push(WriteOp::put(key, Item::Slot(entry)));
        self.guard(date).bump = true;
    }

    fn delete_slot(&mut self, booking: &Booking) {
        let (date, key, _) = self.slot(booking);
        self.ops.push(WriteOp::Delete {
            key,
            condition: None,
        });
        self.guard(date).bump = true;
    }

    /// Ops this transaction will carry, guards included.
    fn len(&self) -> usize {
        self.ops.len() + self.guards.len()
    }

    fn into_ops(self) -> Vec<WriteOp> {
        let mut ops = self.ops;
        for (date, guard) in self.guards {
            let key = Key::guard(self.resource, date);
            match (guard.bump, guard.condition) {
                (true, Some(condition)) => ops.push(WriteOp::put_if(key, Item::Guard, condition)),
                (true, None) => ops.push(WriteOp::put(key, Item::Guard)),
                (false, Some(condition)) => ops.push(WriteOp::Check { key, condition }),
                (false, None) => {}
            }
        }
        ops
    }
}

impl Engine {
    pub fn new(
        store: Arc<dyn TimeSlotStore>,
        clock: Arc<dyn Clock>,
        config: Config,
        sink: Arc<dyn ScheduleSink>,
        notify: Arc<NotifyHub>,
    ) -> Self {
        let scheduler = DeadlineScheduler::new(config.calendar);
        Self {
            store,
            clock,
            config,
            scheduler,
            sink,
            notify,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &DeadlineScheduler {
        &self.scheduler
    }

    pub fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// Bound a store call by the configured timeout.
    async fn timed<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, BookingError> {
        match tokio::time::timeout(self.config.store_timeout, call).await {
            Ok(result) => result.map_err(BookingError::from),
            Err(_) => Err(BookingError::StoreUnavailable(format!(
                "store call timed out after {:?}",
                self.config.store_timeout
            ))),
        }
    }

    pub(super) async fn load(&self, id: BookingId) -> Result<(Booking, u64), BookingError> {
        let key = Key::booking(id);
        match self.timed(self.store.get(&key)).await? {
            None => Err(BookingError::BookingNotFound(id)),
            Some(Versioned {
                item: Item::Booking(booking),
                version,
            }) => Ok((booking, version)),
            Some(_) => Err(StoreError::Corrupt(key).into()),
        }
    }

    /// Like `load`, but a booking the actor may not see does not exist.
    pub(super) async fn load_for(
        &self,
        actor: &Actor,
        id: BookingId,
    ) -> Result<(Booking, u64), BookingError> {
        let (booking, version) = self.load(id).await?;
        if !actor.can_access(&booking) {
            return Err(BookingError::BookingNotFound(id));
        }
        Ok((booking, version))
    }

    /// Local dates whose slot partitions can hold a booking overlapping
    /// `span`: the day before the start date through the end date. Bookings
    /// never exceed 24h, so nothing earlier can reach in.
    fn window(&self, span: &Span) -> Vec<NaiveDate> {
        let calendar = self.config.calendar;
        let first = calendar.local_date(span.start);
        let first = first.pred_opt().unwrap_or(first);
        let last = calendar.local_date((span.end - 1).max(span.start));
        first.iter_days().take_while(|d| *d <= last).collect()
    }

    pub(super) async fn snapshot(&self, spans: &[Span]) -> Result<Snapshot, BookingError> {
        let dates: BTreeSet<NaiveDate> = spans.iter().flat_map(|s| self.window(s)).collect();
        let mut snapshot = Snapshot::default();
        for date in dates {
            let partition = Key::slot_partition(&self.config.resource, date);
            let items = self.timed(self.store.query(&partition)).await?;
            let mut guard = None;
            for (key, value) in items {
                match value.item {
                    Item::Guard => guard = Some(value.version),
                    Item::Slot(entry) => snapshot.entries.push(entry),
                    Item::Booking(_) => return Err(StoreError::Corrupt(key).into()),
                }
            }
            snapshot.guards.insert(date, guard);
        }
        Ok(snapshot)
    }

    pub(super) fn txn(&self) -> Txn<'_> {
        Txn {
            resource: &self.config.resource,
            calendar: self.config.calendar,
            ops: Vec::new(),
            guards: BTreeMap::new(),
        }
    }

    /// Only validation is bounded by `store_timeout`: a write the store has
    /// accepted is never reported as failed.
    pub(super) async fn commit(&self, txn: Txn<'_>) -> Result<(), BookingError> {
        let ops = txn.into_ops();
        let deadline = tokio::time::Instant::now() + self.config.store_timeout;
        Ok(self.store.transact_write_by(ops, deadline).await?)
    }

    async fn pause_before_retry(&self, op: &'static str, attempt: u32) {
        metrics::counter!(observability::COMMIT_RETRIES_TOTAL, "op" => op).increment(1);
        tracing::debug!("{op}: commit lost a race, retrying (attempt {attempt})");
        tokio::time::sleep(Duration::from_millis(u64::from(attempt) * 2)).await;
    }

    /// Hand an approved temporary booking's timetable to the sink.
    pub(super) async fn arm(&self, booking: &Booking) {
        let Some(schedule) = self.scheduler.schedule_for(booking, self.now()) else {
            return;
        };
        if let Err(e) = self.sink.arm(&schedule).await {
            metrics::counter!(observability::SCHEDULE_SINK_FAILURES_TOTAL, "call" => "arm").increment(1);
            warn!("booking {}: failed to arm schedule: {e}", booking.id);
        }
    }

    pub(super) async fn disarm(&self, id: BookingId) {
        if let Err(e) = self.sink.disarm(id).await {
            metrics::counter!(observability::SCHEDULE_SINK_FAILURES_TOTAL, "call" => "disarm")
                .increment(1);
            warn!("booking {id}: failed to disarm schedule: {e}");
        }
    }
}

fn record<T>(op: &'static str, started: Instant, result: &Result<T, BookingError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(observability::OPERATIONS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(observability::OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}
