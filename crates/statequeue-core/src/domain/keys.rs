//! Store key naming.
//!
//! Keys are a pure function of the queue name and the state name, so any
//! process sharing a queue computes the same keys without coordination.
//!
//! | key | format |
//! |---|---|
//! | state queue | `__q-{queue}-{state}` |
//! | processing queue | `__q-{queue}-processing` |
//! | job record | `__q-{queue}:job:{id}` |

use super::ids::JobId;
use super::state::StateName;

const PREFIX: &str = "__q-";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(queue_name: &str) -> Self {
        Self {
            prefix: format!("{PREFIX}{queue_name}"),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// List holding identifiers waiting in `state`.
    pub fn state_queue(&self, state: &StateName) -> String {
        format!("{}-{}", self.prefix, state)
    }

    /// List holding identifiers claimed by a consumer.
    pub fn processing_queue(&self) -> String {
        self.state_queue(&StateName::processing())
    }

    /// Hash holding the job record.
    pub fn record(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ready", "__q-mail-ready")]
    #[case("sent", "__q-mail-sent")]
    #[case("processing", "__q-mail-processing")]
    fn state_queue_keys(#[case] state: &str, #[case] expected: &str) {
        let keys = KeySpace::new("mail");
        assert_eq!(keys.state_queue(&StateName::new(state)), expected);
    }

    #[test]
    fn processing_queue_matches_reserved_state() {
        let keys = KeySpace::new("mail");
        assert_eq!(keys.processing_queue(), "__q-mail-processing");
    }

    #[test]
    fn records_are_namespaced_per_queue() {
        let id = JobId::new("job-1").unwrap();
        assert_eq!(KeySpace::new("a").record(&id), "__q-a:job:job-1");
        assert_ne!(KeySpace::new("a").record(&id), KeySpace::new("b").record(&id));
    }
}
