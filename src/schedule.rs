//! The seam to an external timer service.
//!
//! The engine never holds timers. After a commit it hands the computed
//! [`Schedule`] to a [`ScheduleSink`], which is expected to call
//! [`crate::reaper::reap_expired`] (or cancel the booking directly) when the
//! auto-cancel entry fires.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::deadline::Schedule;
use crate::model::BookingId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkError(pub String);

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "schedule sink: {}", self.0)
    }
}

impl std::error::Error for SinkError {}

#[async_trait]
pub trait ScheduleSink: Send + Sync {
    /// Replace any timers armed for `schedule.booking_id` with these.
    async fn arm(&self, schedule: &Schedule) -> Result<(), SinkError>;

    /// Drop every timer armed for the booking. Disarming an unknown id is fine.
    async fn disarm(&self, booking_id: BookingId) -> Result<(), SinkError>;
}

/// Discards everything.
pub struct NoopSink;

#[async_trait]
impl ScheduleSink for NoopSink {
    async fn arm(&self, _schedule: &Schedule) -> Result<(), SinkError> {
        Ok(())
    }

    async fn disarm(&self, _booking_id: BookingId) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Emits each call as a JSON log line for an external scheduler to tail.
pub struct LoggingSink;

#[async_trait]
impl ScheduleSink for LoggingSink {
    async fn arm(&self, schedule: &Schedule) -> Result<(), SinkError> {
        let json = serde_json::to_string(schedule).map_err(|e| SinkError(e.to_string()))?;
        info!(target: "studiokeep::schedule", booking_id = %schedule.booking_id, "arm {json}");
        Ok(())
    }

    async fn disarm(&self, booking_id: BookingId) -> Result<(), SinkError> {
        info!(target: "studiokeep::schedule", booking_id = %booking_id, "disarm");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Arm(Schedule),
    Disarm(BookingId),
}

/// Keeps every call in memory, in order.
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
}

impl RecordingSink {
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn armed(&self, booking_id: BookingId) -> Option<Schedule> {
        self.calls().into_iter().rev().find_map(|call| match call {
            SinkCall::Arm(s) if s.booking_id == booking_id => Some(s),
            _ => None,
        })
    }

    fn push(&self, call: SinkCall) -> Result<(), SinkError> {
        self.calls
            .lock()
            .map_err(|_| SinkError("recording sink poisoned".into()))?
            .push(call);
        Ok(())
    }
}

#[async_trait]
impl ScheduleSink for RecordingSink {
    async fn arm(&self, schedule: &Schedule) -> Result<(), SinkError> {
        self.push(SinkCall::Arm(schedule.clone()))
    }

    async fn disarm(&self, booking_id: BookingId) -> Result<(), SinkError> {
        self.push(SinkCall::Disarm(booking_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deadline::DeadlineScheduler;
    use ulid::Ulid;

    #[tokio::test]
    async fn recording_sink_keeps_order() {
        let sink = RecordingSink::default();
        let id = Ulid::new();
        let schedule = DeadlineScheduler::default().notification_schedule(id, 30 * 86_400_000, 0);
        sink.arm(&schedule).await.unwrap();
        sink.disarm(id).await.unwrap();
        assert_eq!(
            sink.calls(),
            vec![SinkCall::Arm(schedule.clone()), SinkCall::Disarm(id)]
        );
        assert_eq!(sink.armed(id), Some(schedule));
        assert_eq!(sink.armed(Ulid::new()), None);
    }

    #[tokio::test]
    async fn logging_sink_serializes_schedule() {
        let id = Ulid::new();
        let schedule = DeadlineScheduler::default().notification_schedule(id, 30 * 86_400_000, 0);
        LoggingSink.arm(&schedule).await.unwrap();
        LoggingSink.disarm(id).await.unwrap();
        NoopSink.arm(&schedule).await.unwrap();
    }
}
