//! App - application layer
//!
//! Composes the ports into the queue.
//!
//! # Components
//! - **StateMachine**: atomic create / advance / transition over the store
//! - **ConsumptionScheduler**: bounded, reliable consumption (pop -> processing -> complete)
//! - **JobQueue**: the public surface, delegation only
//! - **JobQueueBuilder**: wiring and fail-fast validation
//! - **QueueConfig**: serde / environment configuration

pub mod builder;
pub mod config;
pub mod queue;
pub mod scheduler;
pub mod state_machine;

pub use self::builder::{BuildError, JobQueueBuilder};
pub use self::config::QueueConfig;
pub use self::queue::JobQueue;
pub use self::scheduler::{ConsumptionScheduler, Delivery, Processor, SchedulerSettings};
pub use self::state_machine::StateMachine;
