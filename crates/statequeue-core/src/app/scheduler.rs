//! ConsumptionScheduler - concurrency-bounded reliable consumption
//!
//! # Flow
//! 1. one blocking move: wait queue -> processing queue
//! 2. take a slot, hand the job to the processor without awaiting it
//! 3. out of slots: stop listening (backpressure)
//! 4. otherwise arm the next cycle as a fresh task
//! 5. `notify_complete`: transition out of processing, then give the slot back;
//!    the 0 -> 1 edge re-arms the loop
//!
//! At most one pop cycle is armed at any time. An item is never in flight
//! without being in the processing queue, so a crash mid-delivery leaves it
//! there for an operator to recover.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use super::state_machine::StateMachine;
use crate::domain::{JobId, QueueError, QueueEvent, Result, StateName, Transition};

/// Consumer of delivered jobs.
///
/// A delivery holds a slot until completion is reported through
/// [`Delivery::complete`] or `JobQueue::notify_complete`.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, delivery: Delivery);
}

#[async_trait]
impl<F, Fut> Processor for F
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn process(&self, delivery: Delivery) {
        self(delivery).await
    }
}

/// A job moved into the processing queue for this consumer.
pub struct Delivery {
    id: JobId,
    consumed_from: StateName,
    scheduler: Arc<ConsumptionScheduler>,
}

impl Delivery {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// State whose queue this job was taken from.
    pub fn consumed_from(&self) -> &StateName {
        &self.consumed_from
    }

    /// Report completion. Same as `JobQueue::notify_complete(self.id())`.
    ///
    /// Consumes the delivery; after a failed completion retry through
    /// `JobQueue::notify_complete` with the id.
    pub async fn complete(self) -> Result<Option<StateName>> {
        self.scheduler.notify_complete(&self.id).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("consumed_from", &self.consumed_from)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub max_slots: usize,
    pub consume_state: Option<StateName>,
    pub pop_timeout: Option<Duration>,
}

struct SlotState {
    available: usize,
    listening: bool,
    /// A pop cycle task exists (running or about to run).
    armed: bool,
    processor: Option<Arc<dyn Processor>>,
    /// Delivered and not yet completed. `available + in_flight.len() == max_slots`.
    in_flight: HashSet<JobId>,
}

pub struct ConsumptionScheduler {
    machine: Arc<StateMachine>,
    settings: SchedulerSettings,
    slots: Mutex<SlotState>,
    shutdown_tx: watch::Sender<bool>,
}

impl ConsumptionScheduler {
    pub fn new(machine: Arc<StateMachine>, settings: SchedulerSettings) -> Arc<Self> {
        let max_slots = settings.max_slots.max(1);
        let (shutdown_tx, _rx) = watch::channel(false);
        Arc::new(Self {
            machine,
            settings: SchedulerSettings {
                max_slots,
                ..settings
            },
            slots: Mutex::new(SlotState {
                available: max_slots,
                listening: false,
                armed: false,
                processor: None,
                in_flight: HashSet::new(),
            }),
            shutdown_tx,
        })
    }

    pub fn max_slots(&self) -> usize {
        self.settings.max_slots
    }

    pub async fn available_slots(&self) -> usize {
        self.slots.lock().await.available
    }

    pub async fn is_listening(&self) -> bool {
        self.slots.lock().await.listening
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn consume_state(&self) -> Result<&StateName> {
        self.settings
            .consume_state
            .as_ref()
            .ok_or(QueueError::NoConsumeState)
    }

    /// Bind the processor and start consuming. Only the first call binds;
    /// later calls fail with `ProcessorAlreadyBound` and change nothing.
    pub async fn register_processor(self: &Arc<Self>, processor: Arc<dyn Processor>) -> Result<()> {
        let state = self.consume_state()?.clone();
        self.machine.ensure_open()?;

        let mut slots = self.slots.lock().await;
        if slots.processor.is_some() {
            warn!("processor already bound, ignoring registration");
            return Err(QueueError::ProcessorAlreadyBound);
        }
        slots.processor = Some(processor);
        slots.listening = slots.available > 0;
        info!(
            consume_state = %state,
            max_slots = self.settings.max_slots,
            "processor bound"
        );
        self.arm(&mut slots);
        Ok(())
    }

    /// Finish a delivered job: move it from processing to the state after the
    /// consumed one, then release its slot. A failed transition keeps the slot.
    ///
    /// Only jobs delivered by this scheduler and not yet completed are
    /// accepted; anything else fails with `NotInFlight` and touches nothing.
    pub async fn notify_complete(self: &Arc<Self>, id: &JobId) -> Result<Option<StateName>> {
        let consumed = self.consume_state()?;
        let next = self.machine.next_state(id, Some(consumed))?;

        // Claimed before the round trip so a concurrent repeat is rejected too.
        if !self.slots.lock().await.in_flight.remove(id) {
            warn!(job_id = %id, "completion for a job not in flight, ignoring");
            return Err(QueueError::NotInFlight(id.clone()));
        }

        let moved = self
            .machine
            .transition(id, Transition::new(StateName::processing(), next.clone()))
            .await;

        let mut slots = self.slots.lock().await;
        if let Err(err) = moved {
            slots.in_flight.insert(id.clone());
            return Err(err);
        }
        slots.available += 1;
        if slots.available == 1 && slots.processor.is_some() {
            slots.listening = true;
            self.arm(&mut slots);
        }
        Ok(next)
    }

    /// Restart consumption after a pop failure stopped it. Returns whether a
    /// pop cycle is armed afterwards.
    pub async fn resume(self: &Arc<Self>) -> bool {
        let mut slots = self.slots.lock().await;
        if slots.processor.is_none() || slots.available == 0 {
            return slots.armed;
        }
        slots.listening = true;
        self.arm(&mut slots);
        slots.armed
    }

    /// Stop issuing pops and cancel the one in flight.
    pub fn shutdown(&self) {
        // send_replace stores the flag even while no pop cycle is subscribed
        self.shutdown_tx.send_replace(true);
    }

    fn arm(self: &Arc<Self>, slots: &mut SlotState) {
        if slots.armed || self.is_shut_down() || self.machine.is_closed() {
            return;
        }
        slots.armed = true;
        self.spawn_cycle();
    }

    // Next scheduling tick, not in-stack: fast completions must not deepen recursion.
    fn spawn_cycle(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.pop_cycle().await;
        });
    }

    async fn active_processor(&self) -> Option<Arc<dyn Processor>> {
        let mut slots = self.slots.lock().await;
        if slots.listening && !self.is_shut_down() && !self.machine.is_closed() {
            if let Some(processor) = &slots.processor {
                return Some(Arc::clone(processor));
            }
        }
        slots.armed = false;
        None
    }

    async fn disarm(&self) {
        self.slots.lock().await.armed = false;
    }

    async fn pop_cycle(self: Arc<Self>) {
        let Some(processor) = self.active_processor().await else {
            return;
        };
        let Ok(consumed) = self.consume_state().cloned() else {
            self.disarm().await;
            return;
        };

        let keys = self.machine.keys();
        let wait_queue = keys.state_queue(&consumed);
        let processing_queue = keys.processing_queue();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        // the pop may wait indefinitely, so race it against shutdown
        let stopped = async move {
            let _ = shutdown_rx.wait_for(|closed| *closed).await;
        };
        let popped = tokio::select! {
            biased;
            _ = stopped => None,
            popped = self.machine.store().blocking_move(
                &wait_queue,
                &processing_queue,
                self.settings.pop_timeout,
            ) => Some(popped),
        };
        let Some(popped) = popped else {
            self.disarm().await;
            return;
        };

        match popped {
            Ok(Some(raw)) => {
                let delivery = Delivery {
                    id: JobId::from_store(raw),
                    consumed_from: consumed,
                    scheduler: Arc::clone(&self),
                };

                let rearm = {
                    let mut slots = self.slots.lock().await;
                    slots.available = slots.available.saturating_sub(1);
                    slots.in_flight.insert(delivery.id.clone());
                    if slots.available == 0 {
                        slots.listening = false;
                        slots.armed = false;
                        false
                    } else {
                        true
                    }
                };
                debug!(job_id = %delivery.id, rearm, "job delivered");

                tokio::spawn(async move {
                    processor.process(delivery).await;
                });
                if rearm {
                    self.spawn_cycle();
                }
            }
            Ok(None) => {
                // timed out with nothing to take
                self.spawn_cycle();
            }
            Err(err) => {
                {
                    let mut slots = self.slots.lock().await;
                    slots.listening = false;
                    slots.armed = false;
                }
                if self.machine.is_closed() {
                    debug!(error = %err, "pop aborted by close");
                    return;
                }
                error!(error = %err, queue = %wait_queue, "blocking pop failed, consumption stopped");
                self.machine.emit(QueueEvent::ConsumeFailed {
                    message: err.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state_machine::tests::RecordingSink;
    use crate::domain::KeySpace;
    use crate::impls::{LinearStates, MemoryJobStore};
    use crate::ports::{EventSink, StoreError};
    use serde_json::json;
    use tokio::sync::mpsc;

    const QUIET: Duration = Duration::from_millis(150);

    struct Fixture {
        machine: Arc<StateMachine>,
        scheduler: Arc<ConsumptionScheduler>,
        store: MemoryJobStore,
        sink: Arc<RecordingSink>,
    }

    fn fixture(max_slots: usize, pop_timeout: Option<Duration>) -> Fixture {
        let store = MemoryJobStore::new();
        let sink = Arc::new(RecordingSink::default());
        let events: Arc<dyn EventSink> = sink.clone();
        let machine = Arc::new(StateMachine::new(
            Arc::new(store.clone()),
            KeySpace::new("test"),
            Arc::new(LinearStates::new(["ready", "done"])),
            events,
        ));
        let scheduler = ConsumptionScheduler::new(
            Arc::clone(&machine),
            SchedulerSettings {
                max_slots,
                consume_state: Some("ready".into()),
                pop_timeout,
            },
        );
        Fixture {
            machine,
            scheduler,
            store,
            sink,
        }
    }

    fn channel_processor() -> (Arc<dyn Processor>, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let processor: Arc<dyn Processor> = Arc::new(move |delivery: Delivery| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(delivery);
            }
        });
        (processor, rx)
    }

    async fn submit(machine: &StateMachine, n: usize) {
        for i in 0..n {
            let id = JobId::new(format!("job-{i}")).unwrap();
            machine.create(&id, json!({"i": i})).await.unwrap();
        }
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery expected")
            .expect("channel open")
    }

    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Delivery>) {
        assert!(tokio::time::timeout(QUIET, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn delivers_through_processing_queue() {
        let fx = fixture(1, None);
        submit(&fx.machine, 1).await;
        assert_eq!(fx.machine.queue_length(&"ready".into()).await.unwrap(), 1);

        let (processor, mut rx) = channel_processor();
        fx.scheduler.register_processor(processor).await.unwrap();

        let delivery = recv(&mut rx).await;
        assert_eq!(delivery.id().as_str(), "job-0");
        assert_eq!(delivery.consumed_from(), &StateName::new("ready"));
        assert_eq!(fx.machine.queue_length(&"ready".into()).await.unwrap(), 0);
        assert_eq!(fx.store.list_snapshot("__q-test-processing").await, vec!["job-0"]);
        assert_eq!(fx.scheduler.available_slots().await, 0);
        assert!(!fx.scheduler.is_listening().await);
    }

    #[tokio::test]
    async fn never_exceeds_max_slots() {
        let fx = fixture(2, None);
        submit(&fx.machine, 5).await;
        let (processor, mut rx) = channel_processor();
        fx.scheduler.register_processor(processor).await.unwrap();

        let first = recv(&mut rx).await;
        let second = recv(&mut rx).await;
        assert_quiet(&mut rx).await;
        assert_eq!(fx.store.list_snapshot("__q-test-processing").await.len(), 2);
        assert_eq!(fx.store.list_snapshot("__q-test-ready").await.len(), 3);

        assert_eq!(first.id().as_str(), "job-0");
        assert_eq!(second.id().as_str(), "job-1");

        first.complete().await.unwrap();
        let third = recv(&mut rx).await;
        assert_eq!(third.id().as_str(), "job-2");
        assert_quiet(&mut rx).await;
    }

    #[tokio::test]
    async fn completion_moves_job_to_next_state() {
        let fx = fixture(1, None);
        submit(&fx.machine, 1).await;
        let (processor, mut rx) = channel_processor();
        fx.scheduler.register_processor(processor).await.unwrap();

        let delivery = recv(&mut rx).await;
        let id = delivery.id().clone();
        let next = delivery.complete().await.unwrap();

        assert_eq!(next, Some("done".into()));
        assert_eq!(fx.store.lists_containing("job-0").await, vec!["__q-test-done"]);
        let snap = fx.machine.read(&id).await.unwrap();
        assert_eq!(snap.state, Some("done".into()));
        assert_eq!(
            fx.sink.events().last().and_then(QueueEvent::as_transition).map(|e| e.from.clone()),
            Some(StateName::processing())
        );
        assert_eq!(fx.scheduler.available_slots().await, 1);
    }

    #[tokio::test]
    async fn second_processor_is_refused() {
        let fx = fixture(1, None);
        submit(&fx.machine, 1).await;
        let (first, mut first_rx) = channel_processor();
        let (second, mut second_rx) = channel_processor();

        fx.scheduler.register_processor(first).await.unwrap();
        // keep the refused processor (and its sender) alive while checking it stays idle
        let err = fx
            .scheduler
            .register_processor(Arc::clone(&second))
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::ProcessorAlreadyBound));
        recv(&mut first_rx).await;
        assert_quiet(&mut second_rx).await;
        drop(second);
    }

    #[tokio::test]
    async fn failed_completion_keeps_the_slot() {
        let fx = fixture(1, None);
        submit(&fx.machine, 2).await;
        let (processor, mut rx) = channel_processor();
        fx.scheduler.register_processor(processor).await.unwrap();
        let delivery = recv(&mut rx).await;
        let id = delivery.id().clone();

        fx.store.fail_batch_at(0).await;
        let err = delivery.complete().await.unwrap_err();
        assert!(matches!(err, QueueError::Store(StoreError::FaultInjected(0))));
        assert_eq!(fx.scheduler.available_slots().await, 0);
        assert_eq!(fx.store.list_snapshot("__q-test-processing").await, vec!["job-0"]);
        assert_quiet(&mut rx).await;

        fx.scheduler.notify_complete(&id).await.unwrap();
        assert_eq!(recv(&mut rx).await.id().as_str(), "job-1");
    }

    #[tokio::test]
    async fn waits_for_work_without_polling() {
        let fx = fixture(1, None);
        let (processor, mut rx) = channel_processor();
        fx.scheduler.register_processor(processor).await.unwrap();
        assert_quiet(&mut rx).await;

        submit(&fx.machine, 1).await;
        assert_eq!(recv(&mut rx).await.id().as_str(), "job-0");
    }

    #[tokio::test]
    async fn pop_timeout_rearms() {
        let fx = fixture(1, Some(Duration::from_millis(20)));
        let (processor, mut rx) = channel_processor();
        fx.scheduler.register_processor(processor).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.scheduler.available_slots().await, 1);

        submit(&fx.machine, 1).await;
        assert_eq!(recv(&mut rx).await.id().as_str(), "job-0");
    }

    #[tokio::test]
    async fn shutdown_cancels_the_pending_pop() {
        let fx = fixture(1, None);
        let (processor, mut rx) = channel_processor();
        fx.scheduler.register_processor(processor).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        fx.scheduler.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        submit(&fx.machine, 1).await;

        assert_quiet(&mut rx).await;
        assert_eq!(fx.machine.queue_length(&"ready".into()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn registering_requires_a_consume_state() {
        let fx = fixture(1, None);
        let scheduler = ConsumptionScheduler::new(
            Arc::clone(&fx.machine),
            SchedulerSettings {
                max_slots: 1,
                consume_state: None,
                pop_timeout: None,
            },
        );
        let (processor, _rx) = channel_processor();
        let err = scheduler.register_processor(processor).await.unwrap_err();
        assert!(matches!(err, QueueError::NoConsumeState));
    }

    #[tokio::test]
    async fn repeated_completion_releases_one_slot() {
        let fx = fixture(2, None);
        submit(&fx.machine, 4).await;
        let (processor, mut rx) = channel_processor();
        fx.scheduler.register_processor(processor).await.unwrap();

        let first = recv(&mut rx).await;
        let _second = recv(&mut rx).await;
        let id = first.id().clone();
        first.complete().await.unwrap();
        assert_eq!(recv(&mut rx).await.id().as_str(), "job-2");

        let err = fx.scheduler.notify_complete(&id).await.unwrap_err();

        assert!(matches!(err, QueueError::NotInFlight(ref rejected) if rejected == &id));
        assert_quiet(&mut rx).await;
        assert_eq!(fx.store.list_snapshot("__q-test-processing").await.len(), 2);
        assert_eq!(fx.store.list_snapshot("__q-test-done").await, vec!["job-0"]);
        assert_eq!(fx.scheduler.available_slots().await, 0);
    }

    #[tokio::test]
    async fn completing_an_undelivered_job_is_rejected() {
        let fx = fixture(1, None);
        submit(&fx.machine, 1).await;
        let id = JobId::new("job-0").unwrap();

        let err = fx.scheduler.notify_complete(&id).await.unwrap_err();

        assert!(matches!(err, QueueError::NotInFlight(_)));
        assert_eq!(fx.store.lists_containing("job-0").await, vec!["__q-test-ready"]);
        assert_eq!(fx.scheduler.available_slots().await, 1);
        assert!(fx.sink.events().is_empty());
    }
}
