//! StateMachine - atomic state transitions over the store
//!
//! Owns the record/queue invariants:
//! - an identifier is never enqueued without a matching record, or vice versa
//! - an identifier sits in at most one queue at a time
//!
//! Each invariant-preserving change is exactly one `Batch`; nothing holds a
//! multi-step transaction open across a round trip.
//!
//! # Store call order
//! - create: `field_exists(id)` -> `execute(record + push)` or `execute(data)`
//! - advance: `field_exists(id)` -> `read_fields(id, state, data)` -> transition
//! - transition: `execute(remove + push + set | remove + delete)`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::{debug, info};

use crate::domain::record::{FIELD_DATA, FIELD_ID, FIELD_STATE, is_structured, json_kind};
use crate::domain::{
    JobId, JobSnapshot, KeySpace, QueueError, QueueEvent, Result, StateName, Transition,
    TransitionEvent,
};
use crate::ports::{Batch, EventSink, JobStore, TransitionFn};

pub struct StateMachine {
    store: Arc<dyn JobStore>,
    keys: KeySpace,
    transitions: Arc<dyn TransitionFn>,
    events: Arc<dyn EventSink>,
    closed: AtomicBool,
}

impl StateMachine {
    pub fn new(
        store: Arc<dyn JobStore>,
        keys: KeySpace,
        transitions: Arc<dyn TransitionFn>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            keys,
            transitions,
            events,
            closed: AtomicBool::new(false),
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub(crate) fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub(crate) fn emit(&self, event: QueueEvent) {
        self.events.emit(event);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    /// Ask the transition function for the state after `current`.
    pub fn next_state(&self, id: &JobId, current: Option<&StateName>) -> Result<Option<StateName>> {
        let next = self.transitions.next_state(id, current);
        match next {
            Some(state) if state.is_empty() || state.is_reserved() => {
                Err(QueueError::ReservedState(state))
            }
            next => Ok(next),
        }
    }

    /// Create a job in its initial state, or replace the data of an existing one.
    pub async fn create(&self, id: &JobId, data: Value) -> Result<()> {
        if !is_structured(&data) {
            return Err(QueueError::InvalidData(json_kind(&data)));
        }
        self.ensure_open()?;

        let initial = self
            .next_state(id, None)?
            .ok_or_else(|| QueueError::NoInitialState(id.clone()))?;
        let record_key = self.keys.record(id);
        let encoded = serde_json::to_string(&data)?;

        // The record always carries an `id` field, so its presence means the job exists.
        if self.store.field_exists(&record_key, FIELD_ID).await? {
            debug!(job_id = %id, "job exists, updating data only");
            self.store
                .execute(Batch::new().set_fields(record_key, [(FIELD_DATA, encoded)]))
                .await?;
            return Ok(());
        }

        let batch = Batch::new()
            .set_fields(
                record_key,
                [
                    (FIELD_ID, id.as_str().to_string()),
                    (FIELD_STATE, initial.as_str().to_string()),
                    (FIELD_DATA, encoded),
                ],
            )
            .push(self.keys.state_queue(&initial), id.as_str());
        self.store.execute(batch).await?;
        debug!(job_id = %id, state = %initial, "job created");
        Ok(())
    }

    /// Move a job out of `expected` into whatever the transition function says
    /// comes next. Fails without touching the store if the job has moved on.
    pub async fn advance(&self, id: &JobId, expected: &StateName) -> Result<Option<StateName>> {
        self.ensure_open()?;
        let record_key = self.keys.record(id);

        if !self.store.field_exists(&record_key, FIELD_ID).await? {
            return Err(QueueError::NotFound(id.clone()));
        }

        let fields = self
            .store
            .read_fields(&record_key, &[FIELD_ID, FIELD_STATE, FIELD_DATA])
            .await?;
        let current = fields.into_iter().nth(1).flatten().map(StateName::new);

        if current.as_ref() != Some(expected) {
            debug!(job_id = %id, expected = %expected, "stale state, refusing to advance");
            return Err(QueueError::StateConflict {
                id: id.clone(),
                actual: current,
                expected: expected.clone(),
            });
        }

        let next = self.next_state(id, Some(expected))?;
        self.transition(id, Transition::new(expected.clone(), next.clone()))
            .await?;
        Ok(next)
    }

    /// The atomic move. Performs no staleness check: a `from` that no longer
    /// matches reality is a no-op removal at the store but still emits.
    pub async fn transition(&self, id: &JobId, transition: Transition) -> Result<()> {
        self.ensure_open()?;
        let record_key = self.keys.record(id);

        // by value, not index: other processes may be mutating the same list
        let batch = Batch::new().remove_value(self.keys.state_queue(&transition.from), id.as_str());
        let batch = match &transition.to {
            Some(to) => batch
                .push(self.keys.state_queue(to), id.as_str())
                .set_fields(record_key, [(FIELD_STATE, to.as_str())]),
            None => batch.delete_field(record_key, FIELD_STATE),
        };
        self.store.execute(batch).await?;

        debug!(
            job_id = %id,
            from = %transition.from,
            to = transition.to.as_ref().map(StateName::as_str),
            "transition committed"
        );
        self.events.emit(QueueEvent::Transition(TransitionEvent {
            id: id.clone(),
            from: transition.from,
            to: transition.to,
        }));
        Ok(())
    }

    pub async fn exists(&self, id: &JobId) -> Result<bool> {
        self.ensure_open()?;
        Ok(self
            .store
            .field_exists(&self.keys.record(id), FIELD_ID)
            .await?)
    }

    /// `NotFound` only when neither state nor data is stored; an ended job
    /// reads as `state: None` with its data.
    pub async fn read(&self, id: &JobId) -> Result<JobSnapshot> {
        self.ensure_open()?;
        let fields = self
            .store
            .read_fields(&self.keys.record(id), &[FIELD_STATE, FIELD_DATA])
            .await?;
        let mut fields = fields.into_iter();
        let state = fields.next().flatten();
        let data = fields.next().flatten();

        if state.is_none() && data.is_none() {
            return Err(QueueError::NotFound(id.clone()));
        }

        let data = match data {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Value::Null,
        };
        Ok(JobSnapshot {
            state: state.map(StateName::new),
            data,
        })
    }

    pub async fn queue_length(&self, state: &StateName) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.store.list_len(&self.keys.state_queue(state)).await?)
    }

    /// Release the store. Emits `Close` once the store is released; later
    /// calls are no-ops. A failed store close leaves the machine open.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(err) = self.store.close().await {
            // still open; a retry runs the whole close again
            self.closed.store(false, Ordering::Release);
            return Err(err.into());
        }
        info!(queue = self.keys.prefix(), "queue closed");
        self.events.emit(QueueEvent::Close);
        Ok(())
    }
}
