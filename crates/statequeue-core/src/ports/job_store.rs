//! JobStore port - ordered lists + hashes with atomic batches
//!
//! The core needs exactly these primitives from a store:
//! - field existence and multi-field reads on a hash
//! - a batch of {set fields, delete field, remove value from list, push to list}
//!   applied all-or-nothing and never partially visible
//! - a blocking atomic move from the tail of one list to the head of another
//!
//! Serializability of batches is assumed, not checked. If a backend cannot
//! uphold it the queue invariants do not hold.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection is closed")]
    Closed,

    #[error("injected fault at batch op {0}")]
    FaultInjected(usize),

    #[error("store backend: {0}")]
    Backend(String),

    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}

/// One operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Set (or overwrite) fields of a hash.
    SetFields {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Delete one field of a hash.
    DeleteField { key: String, field: String },
    /// Remove every occurrence of `value` from a list.
    RemoveValue { list: String, value: String },
    /// Push `value` onto the head of a list.
    Push { list: String, value: String },
}

/// Ordered set of operations executed as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fields<K, V>(
        mut self,
        key: impl Into<String>,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.ops.push(BatchOp::SetFields {
            key: key.into(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        });
        self
    }

    pub fn delete_field(mut self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.ops.push(BatchOp::DeleteField {
            key: key.into(),
            field: field.into(),
        });
        self
    }

    pub fn remove_value(mut self, list: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(BatchOp::RemoveValue {
            list: list.into(),
            value: value.into(),
        });
        self
    }

    pub fn push(mut self, list: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(BatchOp::Push {
            list: list.into(),
            value: value.into(),
        });
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Store adapter used by the state machine and the scheduler.
///
/// # Ordering
/// - `Push` and the destination side of `blocking_move` write the head
/// - `blocking_move` takes from the tail
///
/// so every list is FIFO regardless of which operation enqueued an item.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn field_exists(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// Values in the order of `fields`; missing fields (or a missing hash) read as `None`.
    async fn read_fields(
        &self,
        key: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<String>>, StoreError>;

    /// Apply every op or none of them.
    async fn execute(&self, batch: Batch) -> Result<(), StoreError>;

    /// Atomically pop the tail of `source` and push it onto the head of
    /// `destination`. Waits until an item is available; `Ok(None)` means the
    /// timeout elapsed first. `None` timeout waits indefinitely.
    async fn blocking_move(
        &self,
        source: &str,
        destination: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, StoreError>;

    async fn list_len(&self, key: &str) -> Result<usize, StoreError>;

    /// Release the connection. Later calls fail with `StoreError::Closed`.
    async fn close(&self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_keeps_op_order() {
        let batch = Batch::new()
            .remove_value("from", "job-1")
            .push("to", "job-1")
            .set_fields("rec", [("state", "to")]);

        assert_eq!(batch.len(), 3);
        assert!(matches!(batch.ops()[0], BatchOp::RemoveValue { .. }));
        assert!(matches!(batch.ops()[1], BatchOp::Push { .. }));
        assert_eq!(
            batch.ops()[2],
            BatchOp::SetFields {
                key: "rec".to_string(),
                fields: vec![("state".to_string(), "to".to_string())],
            }
        );
    }
}
