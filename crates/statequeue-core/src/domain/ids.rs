//! Job identifiers.
//!
//! Identifiers are opaque strings chosen by the producer. Generated ones
//! (see `ports::IdGenerator`) are ULID based and carry a `job-` prefix, so
//! they sort by creation time.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use super::errors::QueueError;

/// Display prefix for generated identifiers.
pub const GENERATED_PREFIX: &str = "job-";

/// Identifier of a job record.
///
/// Unique within a queue namespace. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    /// Validate and wrap a caller-supplied identifier.
    pub fn new(value: impl Into<String>) -> Result<Self, QueueError> {
        let value = value.into();
        if value.is_empty() {
            return Err(QueueError::InvalidIdentifier);
        }
        Ok(Self(value))
    }

    /// Identifier derived from a ULID (`job-01H...`).
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(format!("{GENERATED_PREFIX}{ulid}"))
    }

    /// Values read back from a store list were validated when they were written.
    pub(crate) fn from_store(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = QueueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for JobId {
    type Error = QueueError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifier_is_rejected() {
        let err = JobId::new("").unwrap_err();
        assert!(matches!(err, QueueError::InvalidIdentifier));
    }

    #[test]
    fn identifier_displays_verbatim() {
        let id = JobId::new("job-1").unwrap();
        assert_eq!(id.to_string(), "job-1");
        assert_eq!(id.as_str(), "job-1");
    }

    #[test]
    fn ulid_identifiers_carry_prefix() {
        let ulid = Ulid::new();
        let id = JobId::from_ulid(ulid);
        assert_eq!(id.as_str(), format!("job-{ulid}"));
    }

    #[test]
    fn deserializing_empty_identifier_fails() {
        let ok: JobId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");

        let err = serde_json::from_str::<JobId>("\"\"");
        assert!(err.is_err());
    }
}
