//! In-memory job store.
//!
//! Behaves like the list + hash subset of a key-value server, inside one
//! process. Used by tests and the demo CLI.
//!
//! # Implementation
//! - one `Mutex` over all tables, so a batch is trivially serializable
//! - batches run against a staged copy and are committed by swap, so a
//!   fault injected at any op leaves nothing behind
//! - `Notify` wakes blocked `blocking_move` callers after every push

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::ports::{Batch, BatchOp, JobStore, StoreError};

#[derive(Debug, Clone, Default)]
struct Tables {
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
}

impl Tables {
    fn apply(&mut self, op: BatchOp) {
        match op {
            BatchOp::SetFields { key, fields } => {
                self.hashes.entry(key).or_default().extend(fields);
            }
            BatchOp::DeleteField { key, field } => {
                if let Some(hash) = self.hashes.get_mut(&key) {
                    hash.remove(&field);
                    if hash.is_empty() {
                        self.hashes.remove(&key);
                    }
                }
            }
            BatchOp::RemoveValue { list, value } => {
                if let Some(items) = self.lists.get_mut(&list) {
                    items.retain(|item| item != &value);
                    if items.is_empty() {
                        self.lists.remove(&list);
                    }
                }
            }
            BatchOp::Push { list, value } => {
                self.lists.entry(list).or_default().push_front(value);
            }
        }
    }

    fn pop_tail(&mut self, list: &str) -> Option<String> {
        let items = self.lists.get_mut(list)?;
        let value = items.pop_back();
        if items.is_empty() {
            self.lists.remove(list);
        }
        value
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: Tables,
    closed: bool,
    /// One-shot fault: abort the next batch long enough to reach this op index.
    fault_at: Option<usize>,
    /// One-shot fault: fail the next `close`.
    close_fault: bool,
}

/// In-memory `JobStore`.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<Mutex<MemoryState>>,
    notify: Arc<Notify>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next batch with more than `op_index` ops fail at that op.
    /// Nothing from the failing batch is applied.
    pub async fn fail_batch_at(&self, op_index: usize) {
        self.state.lock().await.fault_at = Some(op_index);
    }

    /// Make the next `close` fail and leave the store open.
    pub async fn fail_next_close(&self) {
        self.state.lock().await.close_fault = true;
    }

    /// Contents of a list, head first.
    pub async fn list_snapshot(&self, key: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .tables
            .lists
            .get(key)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn hash_snapshot(&self, key: &str) -> Option<HashMap<String, String>> {
        let state = self.state.lock().await;
        state.tables.hashes.get(key).cloned()
    }

    /// Every list key currently holding `value`.
    pub async fn lists_containing(&self, value: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut keys: Vec<String> = state
            .tables
            .lists
            .iter()
            .filter(|(_, items)| items.iter().any(|item| item == value))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn field_exists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(StoreError::Closed);
        }
        Ok(state
            .tables
            .hashes
            .get(key)
            .is_some_and(|hash| hash.contains_key(field)))
    }

    async fn read_fields(
        &self,
        key: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<String>>, StoreError> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(StoreError::Closed);
        }
        let hash = state.tables.hashes.get(key);
        Ok(fields
            .iter()
            .map(|field| hash.and_then(|h| h.get(*field).cloned()))
            .collect())
    }

    async fn execute(&self, batch: Batch) -> Result<(), StoreError> {
        let pushed = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(StoreError::Closed);
            }

            let fault_at = match state.fault_at {
                Some(index) if index < batch.len() => state.fault_at.take(),
                _ => None,
            };

            let mut staged = state.tables.clone();
            let mut pushed = false;
            for (index, op) in batch.into_ops().into_iter().enumerate() {
                if fault_at == Some(index) {
                    return Err(StoreError::FaultInjected(index));
                }
                pushed |= matches!(op, BatchOp::Push { .. });
                staged.apply(op);
            }
            state.tables = staged;
            pushed
        }; // Lock released here

        if pushed {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn blocking_move(
        &self,
        source: &str,
        destination: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<String>, StoreError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            // Register interest before checking so a push between the check
            // and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(StoreError::Closed);
                }
                if let Some(value) = state.tables.pop_tail(source) {
                    state
                        .tables
                        .apply(BatchOp::Push {
                            list: destination.to_string(),
                            value: value.clone(),
                        });
                    drop(state);
                    self.notify.notify_waiters();
                    return Ok(Some(value));
                }
            }

            match deadline {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(deadline) => return Ok(None),
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn list_len(&self, key: &str) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(StoreError::Closed);
        }
        Ok(state.tables.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn close(&self) -> Result<(), StoreError> {
        {
            let mut state = self.state.lock().await;
            if std::mem::take(&mut state.close_fault) {
                return Err(StoreError::Backend("injected close failure".into()));
            }
            state.closed = true;
        }
        // Wake blocked movers so they observe the close.
        self.notify.notify_waiters();
        Ok(())
    }
}
