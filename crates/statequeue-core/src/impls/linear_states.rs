//! LinearStates - the common straight-line life-cycle.
//!
//! `[s0, s1, ..., sn]`: absent -> s0, si -> s(i+1), sn -> absent.
//! A state that is not in the list also ends the job.

use crate::domain::{JobId, StateName};
use crate::ports::TransitionFn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearStates {
    states: Vec<StateName>,
}

impl LinearStates {
    pub fn new<I, S>(states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateName>,
    {
        Self {
            states: states.into_iter().map(Into::into).collect(),
        }
    }

    /// Initial state; the natural state to consume from.
    pub fn first(&self) -> Option<&StateName> {
        self.states.first()
    }
}

impl TransitionFn for LinearStates {
    fn next_state(&self, _id: &JobId, current: Option<&StateName>) -> Option<StateName> {
        match current {
            None => self.states.first().cloned(),
            Some(current) => {
                let index = self.states.iter().position(|s| s == current)?;
                self.states.get(index + 1).cloned()
            }
        }
    }
}
