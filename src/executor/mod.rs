//! # Transition Executor
//!
//! One lane per partition, each a strict FIFO queue drained by its own worker
//! task. Lanes run independently; a shared semaphore caps how many transition
//! behaviors run at once across all of them.
//!
//! Accepting a message never blocks on the partition: the message is pushed
//! onto the lane's channel and a [`TransitionHandle`] is returned at once.

mod handle;
mod lane;

pub use handle::TransitionHandle;

use crate::boundary::{ResultSink, StateStore};
use crate::config::EngineConfig;
use crate::core::PartitionKey;
use crate::events::EngineEvent;
use crate::factory::RegisteredFactory;
use crate::message::{TransitionMessage, TransitionResult};
use dashmap::DashMap;
use handle::QueueSlot;
use lane::{Accepted, Lane, LaneItem};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, Semaphore};
use tracing::{debug, info, warn};

struct QueuedMessage {
    partition: PartitionKey,
    slot: Arc<QueueSlot>,
}

struct ExecutorInner {
    config: EngineConfig,
    lanes: DashMap<PartitionKey, Lane>,
    /// Messages accepted but not yet started, by message id
    queued: DashMap<String, QueuedMessage>,
    workers: Semaphore,
    sink: Arc<dyn ResultSink>,
    store: Arc<dyn StateStore>,
    events: broadcast::Sender<EngineEvent>,
    next_lane_id: AtomicU64,
    closed: AtomicBool,
}

impl ExecutorInner {
    fn publish(&self, event: EngineEvent) {
        // no subscribers is the common case
        let _ = self.events.send(event);
    }
}

/// Orders and runs transition messages per partition.
///
/// Cloning is cheap; clones share the same lanes and worker pool. Must be
/// used from within a Tokio runtime.
#[derive(Clone)]
pub struct TransitionExecutor {
    inner: Arc<ExecutorInner>,
}

impl TransitionExecutor {
    pub fn new(
        config: EngineConfig,
        sink: Arc<dyn ResultSink>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            inner: Arc::new(ExecutorInner {
                workers: Semaphore::new(config.worker_pool_size.max(1)),
                config,
                lanes: DashMap::new(),
                queued: DashMap::new(),
                sink,
                store,
                events,
                next_lane_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Enqueue `message` on its partition's lane, served by `factory`.
    ///
    /// The instance is looked up (or created) now. The lane records whether
    /// the message's from-state is what it expects the partition to be in:
    /// the current state, or the target of the message queued just before.
    /// Only such a message, overtaken by an earlier one before it reaches
    /// the head of the lane, is reported as `CONFLICTING_TRANSITION`; any
    /// other from-state mismatch is `STALE_STATE`.
    pub fn accept(
        &self,
        message: TransitionMessage,
        factory: Arc<RegisteredFactory>,
    ) -> TransitionHandle {
        if self.is_closed() {
            return self.refuse(&message, "engine is shut down");
        }
        let partition = message.partition_key();
        let model = factory.get_or_create_state_model(&partition);
        let message = Arc::new(message);
        let (reply, receiver) = oneshot::channel();
        let slot = Arc::new(QueueSlot::new(reply));

        let entry = self.inner.lanes.entry(partition.clone());
        if self.is_closed() {
            drop(entry);
            return self.refuse(&message, "engine is shut down");
        }
        let mut lane = entry.or_insert_with(|| self.inner.spawn_lane(partition.clone()));

        let (current, version) = model.observe();
        let accepted = Accepted {
            version,
            anticipated: message.from_state == current
                || lane.tail.as_deref() == Some(message.from_state.as_str()),
        };

        self.inner.queued.insert(
            message.id.clone(),
            QueuedMessage {
                partition: partition.clone(),
                slot: Arc::clone(&slot),
            },
        );
        let item = LaneItem {
            message: Arc::clone(&message),
            factory,
            model,
            accepted,
            slot: Arc::clone(&slot),
        };

        lane.pending.fetch_add(1, Ordering::AcqRel);
        if let Err(failed) = lane.sender.send(item) {
            warn!(partition = %partition, lane = lane.id, "Lane worker gone; restarting lane");
            *lane = self.inner.spawn_lane(partition.clone());
            lane.pending.fetch_add(1, Ordering::AcqRel);
            if lane.sender.send(failed.0).is_err() {
                warn!(partition = %partition, message_id = %message.id, "Could not enqueue message");
            }
        }
        lane.tail = Some(message.to_state.clone());
        drop(lane);

        debug!(
            partition = %partition,
            message_id = %message.id,
            from = %message.from_state,
            to = %message.to_state,
            "Message accepted"
        );
        TransitionHandle::queued(message.id.clone(), partition, receiver, slot)
    }

    /// Resolve `message` immediately as `UNRESOLVED_FACTORY`.
    ///
    /// The result still reaches the sink and the event channel.
    pub fn refuse(&self, message: &TransitionMessage, detail: &str) -> TransitionHandle {
        let partition = message.partition_key();
        let result = TransitionResult::unresolved(message, detail);
        warn!(
            partition = %partition,
            message_id = %message.id,
            definition = %message.definition_name,
            detail,
            "Message refused"
        );

        self.inner.publish(EngineEvent::TransitionCompleted {
            partition: partition.clone(),
            factory: None,
            result: result.clone(),
        });
        let sink = Arc::clone(&self.inner.sink);
        let delivered = result.clone();
        tokio::spawn(async move { sink.deliver(delivered).await });

        TransitionHandle::resolved(partition, result)
    }

    /// Cancel a message that is still queued.
    ///
    /// Returns false if the id is unknown or the message already started.
    pub fn cancel(&self, message_id: &str) -> bool {
        let Some((_, queued)) = self
            .inner
            .queued
            .remove_if(message_id, |_, queued| queued.slot.try_cancel())
        else {
            return false;
        };

        info!(partition = %queued.partition, message_id, "Queued message cancelled");
        self.inner.publish(EngineEvent::MessageCancelled {
            partition: queued.partition,
            message_id: message_id.to_string(),
        });
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Number of partitions with a live lane.
    pub fn active_lanes(&self) -> usize {
        self.inner.lanes.len()
    }

    /// Number of messages accepted but not yet started.
    pub fn queued_messages(&self) -> usize {
        self.inner.queued.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop accepting and wait for every lane to drain.
    ///
    /// Messages already queued still run to completion.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // accept checks `closed` under the lane's shard lock, so once a pass
        // finds the map empty no lane can appear again
        let mut drained = 0usize;
        loop {
            let partitions: Vec<PartitionKey> = self
                .inner
                .lanes
                .iter()
                .map(|entry| entry.key().clone())
                .collect();
            if partitions.is_empty() {
                break;
            }
            let tasks: Vec<_> = partitions
                .iter()
                .filter_map(|partition| self.inner.lanes.remove(partition))
                .map(|(_, lane)| lane.task)
                .collect();

            drained += tasks.len();
            debug!(lanes = tasks.len(), "Draining lanes");
            for task in tasks {
                if let Err(error) = task.await {
                    warn!(error = %error, "Lane worker ended abnormally");
                }
            }
        }
        info!(lanes = drained, "Executor shut down");
    }
}

impl std::fmt::Debug for TransitionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionExecutor")
            .field("lanes", &self.inner.lanes.len())
            .field("queued", &self.inner.queued.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{InMemoryStateStore, NoopResultSink};
    use crate::core::{FactoryKey, StateModelDefinition};
    use crate::error::{ErrorKind, TransitionFailure};
    use crate::factory::StateModelFactory;
    use crate::model::{TransitionContext, TransitionHandlers};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn executor(config: EngineConfig) -> TransitionExecutor {
        TransitionExecutor::new(
            config,
            Arc::new(NoopResultSink),
            Arc::new(InMemoryStateStore::new()),
        )
    }

    fn registered(factory: Arc<dyn StateModelFactory>) -> Arc<RegisteredFactory> {
        Arc::new(RegisteredFactory::new(
            FactoryKey::default_for("MasterSlave"),
            Arc::new(StateModelDefinition::master_slave()),
            factory,
        ))
    }

    /// Factory whose OFFLINE -> SLAVE behavior waits until `gate` is notified.
    fn gated(gate: Arc<Notify>) -> Arc<RegisteredFactory> {
        registered(Arc::new(move |_: &PartitionKey| {
            let gate = Arc::clone(&gate);
            TransitionHandlers::new().on("OFFLINE", "SLAVE", move |_ctx: TransitionContext| {
                let gate = Arc::clone(&gate);
                async move {
                    gate.notified().await;
                    Ok::<(), TransitionFailure>(())
                }
            })
        }))
    }

    fn msg(from: &str, to: &str) -> TransitionMessage {
        TransitionMessage::new("TestDB", "TestDB_0", from, to, "MasterSlave")
    }

    #[tokio::test]
    async fn queued_message_can_be_cancelled() {
        let gate = Arc::new(Notify::new());
        let factory = gated(Arc::clone(&gate));
        let executor = executor(EngineConfig::for_testing());
        let mut events = executor.subscribe();

        let first = executor.accept(msg("OFFLINE", "SLAVE"), Arc::clone(&factory));
        let second = executor.accept(msg("SLAVE", "MASTER"), Arc::clone(&factory));
        let second_id = second.message_id().to_string();

        // let the lane pick up the first message
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!executor.cancel(first.message_id()));
        assert!(executor.cancel(&second_id));
        assert!(!executor.cancel(&second_id));

        gate.notify_one();
        assert!(first.await.unwrap().success);
        assert!(second.await.is_none());

        let cancelled = loop {
            if let EngineEvent::MessageCancelled { message_id, .. } = events.recv().await.unwrap() {
                break message_id;
            }
        };
        assert_eq!(cancelled, second_id);
        assert_eq!(executor.queued_messages(), 0);
    }

    #[tokio::test]
    async fn idle_lane_retires() {
        let config = EngineConfig {
            lane_idle_timeout_ms: 30,
            ..EngineConfig::for_testing()
        };
        let executor = executor(config);
        let factory = registered(Arc::new(|_: &PartitionKey| TransitionHandlers::new()));

        executor
            .accept(msg("OFFLINE", "SLAVE"), Arc::clone(&factory))
            .await
            .unwrap();
        assert_eq!(executor.active_lanes(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(executor.active_lanes(), 0);

        // a fresh lane picks up where the old one left off
        let result = executor
            .accept(msg("SLAVE", "MASTER"), factory)
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn shutdown_drains_queued_messages() {
        let executor = executor(EngineConfig::for_testing());
        let factory = registered(Arc::new(|_: &PartitionKey| TransitionHandlers::new()));

        let handles = vec![
            executor.accept(msg("OFFLINE", "SLAVE"), Arc::clone(&factory)),
            executor.accept(msg("SLAVE", "MASTER"), Arc::clone(&factory)),
            executor.accept(msg("MASTER", "SLAVE"), Arc::clone(&factory)),
        ];
        executor.shutdown().await;
        assert!(executor.is_closed());
        assert_eq!(executor.active_lanes(), 0);

        for handle in handles {
            assert!(handle.await.unwrap().success);
        }

        let refused = executor.accept(msg("SLAVE", "OFFLINE"), factory).await.unwrap();
        assert!(refused.is_error(ErrorKind::UnresolvedFactory));
    }

    #[tokio::test]
    async fn refused_message_creates_no_instance() {
        let executor = executor(EngineConfig::for_testing());
        let factory = registered(Arc::new(|_: &PartitionKey| TransitionHandlers::new()));
        executor.shutdown().await;

        let late = TransitionMessage::new("TestDB", "TestDB_9", "OFFLINE", "SLAVE", "MasterSlave");
        let refused = executor.accept(late, Arc::clone(&factory)).await.unwrap();

        assert!(refused.is_error(ErrorKind::UnresolvedFactory));
        assert!(factory.is_empty());
        assert_eq!(executor.active_lanes(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_waits_for_lanes_opened_while_draining() {
        let executor = executor(EngineConfig::for_testing());
        let factory = registered(Arc::new(|_: &PartitionKey| TransitionHandlers::new()));

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let executor = executor.clone();
                let factory = Arc::clone(&factory);
                tokio::spawn(async move {
                    let mut handles = Vec::new();
                    for i in 0..50 {
                        let partition = format!("TestDB_{}", p * 50 + i);
                        handles.push(executor.accept(
                            TransitionMessage::new("TestDB", &partition, "OFFLINE", "SLAVE", "MasterSlave"),
                            Arc::clone(&factory),
                        ));
                        tokio::task::yield_now().await;
                    }
                    handles
                })
            })
            .collect();

        tokio::task::yield_now().await;
        executor.shutdown().await;
        assert_eq!(executor.active_lanes(), 0);

        for producer in producers {
            for handle in producer.await.unwrap() {
                let result = tokio::time::timeout(Duration::from_secs(2), handle)
                    .await
                    .unwrap()
                    .unwrap();
                assert!(result.success || result.is_error(ErrorKind::UnresolvedFactory));
            }
        }
        assert_eq!(executor.active_lanes(), 0);
        assert_eq!(executor.queued_messages(), 0);
    }

    #[tokio::test]
    async fn expired_deadline_times_out_without_running() {
        let executor = executor(EngineConfig::for_testing());
        let factory = registered(Arc::new(|_: &PartitionKey| {
            TransitionHandlers::new().fallback(|_ctx: TransitionContext| async {
                Err::<(), _>(TransitionFailure::new("must not run"))
            })
        }));

        let expired = msg("OFFLINE", "SLAVE").with_deadline(chrono::Utc::now() - chrono::Duration::seconds(1));
        let result = executor.accept(expired, factory).await.unwrap();

        assert!(result.is_error(ErrorKind::Timeout));
        assert_eq!(result.resulting_state, "OFFLINE");
    }

    #[tokio::test]
    async fn panicking_behavior_is_a_user_failure() {
        let executor = executor(EngineConfig::for_testing());
        let factory = registered(Arc::new(|_: &PartitionKey| {
            TransitionHandlers::new().on("OFFLINE", "SLAVE", |_ctx: TransitionContext| async {
                if true {
                    panic!("behavior blew up");
                }
                Ok::<(), TransitionFailure>(())
            })
        }));

        let result = executor
            .accept(msg("OFFLINE", "SLAVE"), Arc::clone(&factory))
            .await
            .unwrap();
        assert!(result.is_error(ErrorKind::UserTransitionFailure));
        assert_eq!(result.resulting_state, "OFFLINE");

        let model = factory
            .get_state_model(&PartitionKey::new("TestDB", "TestDB_0"))
            .unwrap();
        assert!(!model.is_in_flight());
    }
}
