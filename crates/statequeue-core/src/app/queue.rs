//! JobQueue - public surface
//!
//! Thin delegation over `StateMachine` and `ConsumptionScheduler`. Holds no
//! state of its own besides the config and the broadcast sink.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::info;

use super::config::QueueConfig;
use super::scheduler::{ConsumptionScheduler, Processor};
use super::state_machine::StateMachine;
use crate::domain::{JobId, JobSnapshot, QueueEvent, Result, StateName};
use crate::impls::BroadcastEventSink;
use crate::ports::{IdGenerator, SystemClock, UlidGenerator};

/// A named queue of jobs moving through states.
///
/// # Example
/// ```ignore
/// let queue = JobQueueBuilder::new(QueueConfig::new("mail").with_consume_state("ready"))
///     .store(Arc::new(MemoryJobStore::new()))
///     .transitions(LinearStates::new(["ready", "sent"]))
///     .build()?;
///
/// queue.send(&JobId::new("job-1")?, json!({"to": "a@example.com"})).await?;
/// queue.register_processor(|delivery: Delivery| async move {
///     let _ = delivery.complete().await;
/// }).await?;
/// ```
pub struct JobQueue {
    config: QueueConfig,
    machine: Arc<StateMachine>,
    scheduler: Arc<ConsumptionScheduler>,
    events: BroadcastEventSink,
    ids: UlidGenerator<SystemClock>,
}

impl JobQueue {
    pub(crate) fn new(
        config: QueueConfig,
        machine: Arc<StateMachine>,
        scheduler: Arc<ConsumptionScheduler>,
        events: BroadcastEventSink,
    ) -> Self {
        Self {
            config,
            machine,
            scheduler,
            events,
            ids: UlidGenerator::new(SystemClock),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.queue_name
    }

    /// Fresh `job-{ULID}` identifier.
    pub fn create_new_id(&self) -> JobId {
        self.ids.generate_job_id()
    }

    /// Create a job in its initial state; an existing job only gets new data.
    pub async fn send(&self, id: &JobId, data: Value) -> Result<()> {
        self.machine.create(id, data).await
    }

    /// Alias of [`JobQueue::send`].
    pub async fn set(&self, id: &JobId, data: Value) -> Result<()> {
        self.send(id, data).await
    }

    /// Advance a job out of `expected`. Returns the state it moved to, `None` once ended.
    pub async fn done(&self, id: &JobId, expected: &StateName) -> Result<Option<StateName>> {
        self.machine.advance(id, expected).await
    }

    pub async fn has(&self, id: &JobId) -> Result<bool> {
        self.machine.exists(id).await
    }

    pub async fn get(&self, id: &JobId) -> Result<JobSnapshot> {
        self.machine.read(id).await
    }

    pub async fn wait_queue_length(&self, state: &StateName) -> Result<usize> {
        self.machine.queue_length(state).await
    }

    /// Deliveries taken but not yet completed, across every consumer of this queue name.
    pub async fn processing_length(&self) -> Result<usize> {
        self.machine.queue_length(&StateName::processing()).await
    }

    pub async fn register_processor<P>(&self, processor: P) -> Result<()>
    where
        P: Processor + 'static,
    {
        self.scheduler.register_processor(Arc::new(processor)).await
    }

    /// Fails with `NotInFlight` unless `id` was delivered here and is not yet completed.
    pub async fn notify_complete(&self, id: &JobId) -> Result<Option<StateName>> {
        self.scheduler.notify_complete(id).await
    }

    /// Re-arm consumption after a `ConsumeFailed` event.
    pub async fn resume(&self) -> bool {
        self.scheduler.resume().await
    }

    pub async fn available_slots(&self) -> usize {
        self.scheduler.available_slots().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.machine.is_closed()
    }

    /// Stop consuming and release the store. In-flight deliveries stay in the
    /// processing queue.
    pub async fn end(&self) -> Result<()> {
        self.scheduler.shutdown();
        self.machine.close().await?;
        info!(queue = self.name(), "queue ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::JobQueueBuilder;
    use crate::app::scheduler::Delivery;
    use crate::domain::QueueError;
    use crate::impls::{LinearStates, MemoryJobStore};
    use serde_json::json;
    use std::time::Duration;

    fn queue(store: &MemoryJobStore) -> JobQueue {
        JobQueueBuilder::new(QueueConfig::new("mail").with_consume_state("ready"))
            .store(Arc::new(store.clone()))
            .transitions(LinearStates::new(["ready", "sent"]))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn send_then_get() {
        let store = MemoryJobStore::new();
        let queue = queue(&store);
        let id = queue.create_new_id();

        queue.send(&id, json!({"to": "a"})).await.unwrap();

        assert!(queue.has(&id).await.unwrap());
        let snap = queue.get(&id).await.unwrap();
        assert_eq!(snap.state, Some("ready".into()));
        assert_eq!(snap.data, json!({"to": "a"}));
        assert_eq!(queue.wait_queue_length(&"ready".into()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn set_replaces_data_in_place() {
        let store = MemoryJobStore::new();
        let queue = queue(&store);
        let id = JobId::new("job-1").unwrap();

        queue.send(&id, json!([1])).await.unwrap();
        queue.set(&id, json!([2])).await.unwrap();

        assert_eq!(queue.get(&id).await.unwrap().data, json!([2]));
        assert_eq!(queue.wait_queue_length(&"ready".into()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let store = MemoryJobStore::new();
        let queue = queue(&store);
        let a = queue.create_new_id();
        let b = queue.create_new_id();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("job-"));
    }

    #[tokio::test]
    async fn processing_length_counts_taken_jobs() {
        let store = MemoryJobStore::new();
        let queue = queue(&store);
        queue.send(&JobId::new("job-1").unwrap(), json!({})).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        queue
            .register_processor(move |delivery: Delivery| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(delivery);
                }
            })
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.processing_length().await.unwrap(), 1);
        assert_eq!(queue.wait_queue_length(&"ready".into()).await.unwrap(), 0);

        queue.notify_complete(delivery.id()).await.unwrap();
        assert_eq!(queue.processing_length().await.unwrap(), 0);
        assert_eq!(queue.wait_queue_length(&"sent".into()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn end_closes_once_and_rejects_later_calls() {
        let store = MemoryJobStore::new();
        let queue = queue(&store);
        let mut events = queue.subscribe();

        queue.end().await.unwrap();
        queue.end().await.unwrap();

        assert_eq!(events.recv().await.unwrap(), QueueEvent::Close);
        assert!(events.try_recv().is_err());
        assert!(queue.is_closed());
        let err = queue.has(&JobId::new("job-1").unwrap()).await.unwrap_err();
        assert!(matches!(err, QueueError::Closed));
    }
}
