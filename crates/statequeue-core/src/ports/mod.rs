//! Ports - abstraction layer
//!
//! The seams between the core and the outside world: the store adapter,
//! the caller-supplied transition function, event observers, and id
//! generation.
//!
//! # Design
//! - the store is the single source of truth; the core keeps no copy of it
//! - every invariant-preserving change is one `Batch`
//! - transition functions are pure and know nothing about storage

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod job_store;
pub mod transition;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::{Batch, BatchOp, JobStore, StoreError};
pub use self::transition::TransitionFn;
