//! Impls - port implementations
//!
//! - **MemoryJobStore**: in-process store for tests and local runs
//! - **RedisJobStore**: Redis adapter (`redis` feature)
//! - **BroadcastEventSink**: event fan-out used by `JobQueue::subscribe`
//! - **LinearStates**: straight-line transition function

pub mod broadcast_sink;
pub mod linear_states;
pub mod memory_store;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use self::broadcast_sink::BroadcastEventSink;
pub use self::linear_states::LinearStates;
pub use self::memory_store::MemoryJobStore;
#[cfg(feature = "redis")]
pub use self::redis_store::RedisJobStore;
