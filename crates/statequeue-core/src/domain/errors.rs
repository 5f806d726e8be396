//! Errors - queue error taxonomy
//!
//! - local misuse (never reaches the store): `InvalidIdentifier`, `InvalidData`, `ReservedState`
//! - caller view out of date: `NotFound`, `StateConflict`, `NotInFlight`
//! - store failures: `Store`, propagated as-is and never retried

use thiserror::Error;

use super::ids::JobId;
use super::state::{StateName, state_label};
use crate::ports::StoreError;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("identifier must be a non-empty string")]
    InvalidIdentifier,

    #[error("data must be a JSON object or array, got {0}")]
    InvalidData(&'static str),

    #[error("identifier '{0}' does not exist in state machine")]
    NotFound(JobId),

    #[error(
        "current state is not the expected state: identifier={id} actual={} expected={expected}",
        state_label(.actual)
    )]
    StateConflict {
        id: JobId,
        actual: Option<StateName>,
        expected: StateName,
    },

    #[error("state name '{0}' is reserved or empty")]
    ReservedState(StateName),

    #[error("transition function returned no initial state for identifier={0}")]
    NoInitialState(JobId),

    #[error("a processor is already bound to this queue")]
    ProcessorAlreadyBound,

    #[error("identifier '{0}' is not in flight on this consumer")]
    NotInFlight(JobId),

    #[error("no consume state configured")]
    NoConsumeState,

    #[error("queue is closed")]
    Closed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("record codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = QueueError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_both_states() {
        let err = QueueError::StateConflict {
            id: JobId::new("job-1").unwrap(),
            actual: Some(StateName::new("b")),
            expected: StateName::new("a"),
        };
        assert_eq!(
            err.to_string(),
            "current state is not the expected state: identifier=job-1 actual=b expected=a"
        );
    }

    #[test]
    fn not_in_flight_names_the_job() {
        let err = QueueError::NotInFlight(JobId::new("job-7").unwrap());
        assert_eq!(err.to_string(), "identifier 'job-7' is not in flight on this consumer");
    }

    #[test]
    fn store_errors_pass_through() {
        let err: QueueError = StoreError::Closed.into();
        assert!(matches!(err, QueueError::Store(StoreError::Closed)));
        assert_eq!(err.to_string(), StoreError::Closed.to_string());
    }
}
