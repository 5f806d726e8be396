//! State names and transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the processing queue. Not available as a caller state.
pub const PROCESSING: &str = "processing";

/// A caller-defined life-cycle stage.
///
/// The set of states is whatever the transition function produces; the
/// queue only reserves [`PROCESSING`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateName(String);

impl StateName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// The processing queue's pseudo state.
    pub fn processing() -> Self {
        Self(PROCESSING.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_reserved(&self) -> bool {
        self.0 == PROCESSING
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for StateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for StateName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StateName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A move between two queues.
///
/// `to == None` ends the job: it leaves every queue and its record loses
/// the `state` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: StateName,
    pub to: Option<StateName>,
}

impl Transition {
    pub fn new(from: StateName, to: Option<StateName>) -> Self {
        Self { from, to }
    }
}

/// Display helper for an optional state (`<ended>` when absent).
pub(crate) fn state_label(state: &Option<StateName>) -> &str {
    state.as_ref().map(StateName::as_str).unwrap_or("<ended>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_is_reserved() {
        assert!(StateName::processing().is_reserved());
        assert!(!StateName::new("ready").is_reserved());
    }

    #[test]
    fn ended_transition_is_labelled() {
        let t = Transition::new("b".into(), None);
        assert_eq!(state_label(&t.to), "<ended>");
    }
}
