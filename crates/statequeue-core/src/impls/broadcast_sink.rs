//! BroadcastEventSink - fan events out over a tokio broadcast channel.

use tokio::sync::broadcast;

use crate::domain::QueueEvent;
use crate::ports::EventSink;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Slow subscribers lag and miss events instead of blocking emitters.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<QueueEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: QueueEvent) {
        // ignore send error: no subscribers is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let sink = BroadcastEventSink::default();
        let mut rx = sink.subscribe();

        sink.emit(QueueEvent::Close);

        assert_eq!(rx.recv().await.unwrap(), QueueEvent::Close);
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        BroadcastEventSink::new(4).emit(QueueEvent::Close);
    }
}
