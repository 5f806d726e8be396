//! TransitionFn port - caller-supplied life-cycle
//!
//! `(identifier, current state or absent) -> next state or absent`.
//! Pure, no side effects. Any shape works (linear, branching); the state
//! machine never inspects the logic.

use crate::domain::{JobId, StateName};

pub trait TransitionFn: Send + Sync {
    /// `current == None` asks for the initial state. Returning `None` ends the job.
    fn next_state(&self, id: &JobId, current: Option<&StateName>) -> Option<StateName>;
}

impl<F> TransitionFn for F
where
    F: Fn(&JobId, Option<&StateName>) -> Option<StateName> + Send + Sync,
{
    fn next_state(&self, id: &JobId, current: Option<&StateName>) -> Option<StateName> {
        self(id, current)
    }
}
