//! JobQueueBuilder - queue construction and wiring
//!
//! # Design
//! - Fail-fast: the config is validated and every port checked at `build()`
//! - The store is injected; `connect()` is a shortcut for the Redis adapter

use std::sync::Arc;

use super::config::QueueConfig;
use super::queue::JobQueue;
use super::scheduler::{ConsumptionScheduler, SchedulerSettings};
use super::state_machine::StateMachine;
use crate::domain::{KeySpace, QueueError};
use crate::impls::BroadcastEventSink;
use crate::impls::broadcast_sink::DEFAULT_EVENT_CAPACITY;
use crate::ports::{EventSink, JobStore, StoreError, TransitionFn};

/// Builds a [`JobQueue`].
///
/// # Example
/// ```ignore
/// let queue = JobQueueBuilder::new(QueueConfig::from_env()?)
///     .store(Arc::new(MemoryJobStore::new()))
///     .transitions(LinearStates::new(["ready", "sent"]))
///     .build()?;
/// ```
pub struct JobQueueBuilder {
    config: QueueConfig,
    store: Option<Arc<dyn JobStore>>,
    transitions: Option<Arc<dyn TransitionFn>>,
    event_capacity: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no job store configured; call store() or connect() before build()")]
    MissingStore,

    #[error("no transition function configured; call transitions() before build()")]
    MissingTransitions,

    #[error("invalid queue config: {0}")]
    InvalidConfig(#[source] QueueError),

    #[error("failed to connect to the job store: {0}")]
    Connect(#[source] StoreError),
}

impl JobQueueBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            store: None,
            transitions: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transitions<T: TransitionFn + 'static>(mut self, transitions: T) -> Self {
        self.transitions = Some(Arc::new(transitions));
        self
    }

    /// Buffer per subscriber before slow subscribers start lagging.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Connect a `RedisJobStore` at the configured host and port.
    #[cfg(feature = "redis")]
    pub async fn connect(self) -> Result<Self, BuildError> {
        let url = self.config.redis_url();
        let store = crate::impls::RedisJobStore::connect(&url)
            .await
            .map_err(BuildError::Connect)?;
        Ok(self.store(Arc::new(store)))
    }

    pub fn build(self) -> Result<JobQueue, BuildError> {
        self.config.validate().map_err(BuildError::InvalidConfig)?;
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let transitions = self.transitions.ok_or(BuildError::MissingTransitions)?;

        let events = BroadcastEventSink::new(self.event_capacity);
        let sink: Arc<dyn EventSink> = Arc::new(events.clone());
        let machine = Arc::new(StateMachine::new(
            store,
            KeySpace::new(&self.config.queue_name),
            transitions,
            sink,
        ));
        let scheduler = ConsumptionScheduler::new(
            Arc::clone(&machine),
            SchedulerSettings {
                max_slots: self.config.concurrency,
                consume_state: self.config.consume_state.clone(),
                pop_timeout: self.config.pop_timeout(),
            },
        );

        Ok(JobQueue::new(self.config, machine, scheduler, events))
    }
}
