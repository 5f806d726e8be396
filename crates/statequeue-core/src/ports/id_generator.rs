//! IdGenerator port - identifier generation
//!
//! Producers that have no natural identifier ask the queue for one.
//!
//! # ULID properties
//! - sortable by creation time
//! - generated on any node without coordination
//! - 128-bit, so collisions across processes are not a practical concern

use ulid::Ulid;

use crate::domain::JobId;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;
}

/// ULID generator whose timestamp part comes from a `Clock`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        JobId::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}
