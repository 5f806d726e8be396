//! EventSink port - observers of queue events
//!
//! Emission is synchronous and must not block; sinks that fan out to async
//! consumers should hand off to a channel (see `impls::BroadcastEventSink`).

use crate::domain::QueueEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: QueueEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: QueueEvent) {}
}
