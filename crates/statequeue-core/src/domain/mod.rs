//! Domain model (identifiers, state names, records, keys, events, errors).
//!
//! Nothing in here talks to a store; the types are shared by the ports and
//! the app layer.

pub mod errors;
pub mod events;
pub mod ids;
pub mod keys;
pub mod record;
pub mod state;

pub use self::errors::{QueueError, Result};
pub use self::events::{QueueEvent, TransitionEvent};
pub use self::ids::JobId;
pub use self::keys::KeySpace;
pub use self::record::JobSnapshot;
pub use self::state::{StateName, Transition};
