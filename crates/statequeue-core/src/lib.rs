//! statequeue-core
//!
//! Durable finite-state job queues over a list + hash store.
//!
//! # Modules
//! - **domain**: ids, state names, key naming, records, events, errors
//! - **ports**: JobStore, TransitionFn, EventSink, IdGenerator, Clock
//! - **app**: StateMachine, ConsumptionScheduler, JobQueue, builder, config
//! - **impls**: MemoryJobStore, RedisJobStore (`redis` feature), LinearStates, BroadcastEventSink
//!
//! A job lives as one record (`id`, `state`, `data`) plus membership in
//! exactly one per-state queue. Consumers take jobs from a wait queue into the
//! shared `processing` queue and report completion to move them on.

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{
    BuildError, Delivery, JobQueue, JobQueueBuilder, Processor, QueueConfig, StateMachine,
};
pub use domain::{JobId, JobSnapshot, QueueError, QueueEvent, Result, StateName, TransitionEvent};
pub use impls::{BroadcastEventSink, LinearStates, MemoryJobStore};
#[cfg(feature = "redis")]
pub use impls::RedisJobStore;
pub use ports::{JobStore, StoreError, TransitionFn};
