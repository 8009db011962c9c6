use tokio::sync::broadcast;

use crate::model::BookingEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed booking events.
///
/// Events are sent after the transaction that caused them has committed.
/// Slow subscribers lag and skip; they never block a commit.
pub struct NotifyHub {
    sender: broadcast::Sender<BookingEvent>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, event: BookingEvent) {
        let _ = self.sender.send(event);
    }

    pub fn send_all(&self, events: impl IntoIterator<Item = BookingEvent>) {
        for event in events {
            self.send(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        let event = BookingEvent::Confirmed { id: Ulid::new() };
        hub.send(event.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_all_preserves_order() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();
        let id = Ulid::new();
        hub.send_all([
            BookingEvent::Cancelled { id, fee_percent: 0 },
            BookingEvent::Promoted {
                id,
                from_rank: 2,
                to_rank: 1,
            },
        ]);
        assert!(matches!(rx.recv().await.unwrap(), BookingEvent::Cancelled { .. }));
        assert!(matches!(rx.recv().await.unwrap(), BookingEvent::Promoted { .. }));
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber: must not panic
        hub.send(BookingEvent::Confirmed { id: Ulid::new() });
    }

    #[test]
    fn receiver_waits_until_an_event_is_sent() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();
        let mut recv = tokio_test::task::spawn(async move { rx.recv().await });
        tokio_test::assert_pending!(recv.poll());

        hub.send(BookingEvent::Confirmed { id: Ulid::new() });
        assert!(recv.is_woken());
        let received = tokio_test::assert_ready!(recv.poll());
        assert!(matches!(received, Ok(BookingEvent::Confirmed { .. })));
    }
}
