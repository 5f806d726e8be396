//! Events published by a queue.

use serde::Serialize;

use super::ids::JobId;
use super::state::StateName;

/// Payload of a successful state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    pub id: JobId,
    pub from: StateName,
    pub to: Option<StateName>,
}

/// Everything observers can see.
///
/// - `Transition`: fired once per committed transition batch
/// - `ConsumeFailed`: the blocking pop hit a store error and consumption stopped
/// - `Close`: fired once when the store connection is released
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Transition(TransitionEvent),
    ConsumeFailed { message: String },
    Close,
}

impl QueueEvent {
    pub fn as_transition(&self) -> Option<&TransitionEvent> {
        match self {
            QueueEvent::Transition(event) => Some(event),
            _ => None,
        }
    }
}
