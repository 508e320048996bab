//! Lane workers: one ordered queue per partition.

use super::handle::QueueSlot;
use super::ExecutorInner;
use crate::boundary::PartitionStateRecord;
use crate::core::PartitionKey;
use crate::error::{ErrorKind, StoreError, TransitionFailure};
use crate::events::EngineEvent;
use crate::factory::RegisteredFactory;
use crate::message::{TransitionMessage, TransitionResult};
use crate::model::{completion_to_result, Completion, Rejection, StateModel, TransitionTicket};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

/// One accepted message waiting on its lane.
pub(super) struct LaneItem {
    pub(super) message: Arc<TransitionMessage>,
    pub(super) factory: Arc<RegisteredFactory>,
    pub(super) model: Arc<StateModel>,
    pub(super) accepted: Accepted,
    pub(super) slot: Arc<QueueSlot>,
}

/// What the lane knew about the partition when a message was accepted.
#[derive(Clone, Copy, Debug)]
pub(super) struct Accepted {
    /// Instance version at acceptance
    pub(super) version: u64,
    /// The from-state matched the current state or the target of the message
    /// queued just before it
    pub(super) anticipated: bool,
}

pub(super) struct Lane {
    pub(super) id: u64,
    pub(super) sender: mpsc::UnboundedSender<LaneItem>,
    /// Items sent but not yet received by the worker
    pub(super) pending: Arc<AtomicUsize>,
    /// Target state of the most recently accepted message
    pub(super) tail: Option<String>,
    pub(super) task: JoinHandle<()>,
}

impl ExecutorInner {
    pub(super) fn spawn_lane(self: &Arc<Self>, partition: PartitionKey) -> Lane {
        let id = self.next_lane_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let task = tokio::spawn(Arc::clone(self).run_lane(
            partition,
            id,
            receiver,
            Arc::clone(&pending),
        ));
        Lane {
            id,
            sender,
            pending,
            tail: None,
            task,
        }
    }

    async fn run_lane(
        self: Arc<Self>,
        partition: PartitionKey,
        id: u64,
        receiver: mpsc::UnboundedReceiver<LaneItem>,
        pending: Arc<AtomicUsize>,
    ) {
        debug!(partition = %partition, lane = id, "Lane started");
        let idle = self.config.lane_idle_timeout();
        let mut guard = LaneGuard {
            inner: Arc::clone(&self),
            partition: partition.clone(),
            id,
            receiver,
        };

        loop {
            match tokio::time::timeout(idle, guard.receiver.recv()).await {
                Ok(Some(item)) => {
                    pending.fetch_sub(1, Ordering::AcqRel);
                    self.execute(item).await;
                }
                Ok(None) => break,
                Err(_) => {
                    // accept bumps pending under the same shard lock
                    let retired = self
                        .lanes
                        .remove_if(&partition, |_, lane| {
                            lane.id == id && lane.pending.load(Ordering::Acquire) == 0
                        })
                        .is_some();
                    if retired {
                        break;
                    }
                }
            }
        }

        debug!(partition = %partition, lane = id, "Lane retired");
    }

    async fn execute(&self, item: LaneItem) {
        let LaneItem {
            message,
            factory,
            model,
            accepted,
            slot,
        } = item;

        self.queued
            .remove_if(&message.id, |_, queued| Arc::ptr_eq(&queued.slot, &slot));
        let Some(reply) = slot.try_start() else {
            debug!(
                partition = %model.partition(),
                message_id = %message.id,
                "Skipping cancelled message"
            );
            return;
        };

        let result = self.run(&message, &model, accepted).await;

        if result.success {
            if factory.definition().is_dropped(&result.resulting_state) {
                factory.evict_if_current(&model);
                info!(partition = %model.partition(), factory = %factory.key(), "Partition dropped");
            }
            self.persist(&message, &factory, &result).await;
        }

        self.deliver(model.partition(), result.clone()).await;
        self.publish(EngineEvent::TransitionCompleted {
            partition: model.partition().clone(),
            factory: Some(factory.key().clone()),
            result: result.clone(),
        });
        if reply.send(result).is_err() {
            debug!(message_id = %message.id, "Handle dropped before result was ready");
        }
    }

    async fn run(
        &self,
        message: &Arc<TransitionMessage>,
        model: &Arc<StateModel>,
        accepted: Accepted,
    ) -> TransitionResult {
        let _permit = self.workers.acquire().await.ok();

        let budget = match message.deadline {
            Some(deadline) => (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            None => self.config.default_transition_timeout(),
        };
        if budget.is_zero() {
            warn!(
                partition = %model.partition(),
                message_id = %message.id,
                "Deadline passed before transition started"
            );
            return TransitionResult::failure(
                &message.id,
                model.current_state(),
                ErrorKind::Timeout,
                "deadline passed before the transition started",
            );
        }

        let prepared = match model.begin(Arc::clone(message)) {
            Ok(prepared) => prepared,
            Err(rejection) => return rejection_result(&message.id, rejection, accepted),
        };
        let ticket = prepared.ticket().clone();
        let mut task = tokio::spawn(prepared.invoke());

        match tokio::time::timeout(budget, &mut task).await {
            Ok(Ok(outcome)) => {
                let completion = model.complete(&ticket, outcome);
                if let Completion::Discarded { .. } = completion {
                    self.report_discarded(model, &ticket);
                }
                completion_to_result(&message.id, completion)
            }
            Ok(Err(error)) => self.behavior_panicked(message, model, &ticket, error),
            Err(_) => {
                let fenced = model.fence(&ticket);
                self.discard_late_completion(task, Arc::clone(model), ticket.clone());
                if !fenced {
                    // a reset took the ticket before the deadline fired
                    return completion_to_result(
                        &message.id,
                        Completion::Discarded {
                            current_state: model.current_state(),
                        },
                    );
                }
                warn!(
                    partition = %model.partition(),
                    message_id = %message.id,
                    edge = %ticket.edge,
                    token = ticket.token,
                    timeout_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                    "Transition timed out"
                );
                TransitionResult::failure(
                    &message.id,
                    model.current_state(),
                    ErrorKind::Timeout,
                    format!("transition {} exceeded its deadline", ticket.edge),
                )
            }
        }
    }

    /// Let a timed-out behavior finish in the background; its completion is
    /// handed back with the fenced ticket and discarded.
    fn discard_late_completion(
        &self,
        task: JoinHandle<Result<(), TransitionFailure>>,
        model: Arc<StateModel>,
        ticket: TransitionTicket,
    ) {
        let events = self.events.clone();
        tokio::spawn(async move {
            let Ok(outcome) = task.await else {
                return;
            };
            if let Completion::Discarded { .. } = model.complete(&ticket, outcome) {
                let _ = events.send(EngineEvent::StaleCompletionDiscarded {
                    partition: model.partition().clone(),
                    message_id: ticket.message_id.clone(),
                    token: ticket.token,
                });
            }
        });
    }

    fn report_discarded(&self, model: &StateModel, ticket: &TransitionTicket) {
        self.publish(EngineEvent::StaleCompletionDiscarded {
            partition: model.partition().clone(),
            message_id: ticket.message_id.clone(),
            token: ticket.token,
        });
    }

    fn behavior_panicked(
        &self,
        message: &TransitionMessage,
        model: &StateModel,
        ticket: &TransitionTicket,
        error: JoinError,
    ) -> TransitionResult {
        model.fence(ticket);
        warn!(
            partition = %model.partition(),
            message_id = %message.id,
            edge = %ticket.edge,
            error = %error,
            "Transition behavior panicked"
        );
        TransitionResult::failure(
            &message.id,
            model.current_state(),
            ErrorKind::UserTransitionFailure,
            "transition behavior panicked",
        )
    }

    async fn persist(
        &self,
        message: &TransitionMessage,
        factory: &RegisteredFactory,
        result: &TransitionResult,
    ) {
        let record = PartitionStateRecord {
            resource_name: message.resource_name.clone(),
            partition_name: message.partition_name.clone(),
            factory: factory.key().clone(),
            state: result.resulting_state.clone(),
            session_id: message.session_id.clone(),
            message_id: message.id.clone(),
            updated_at: Utc::now(),
        };

        let store = Arc::clone(&self.store);
        let write = record.clone();
        let error = match tokio::spawn(async move { store.persist(&write).await }).await {
            Ok(Ok(())) => return,
            Ok(Err(error)) => error,
            Err(panic) => StoreError::Panicked(panic.to_string()),
        };

        warn!(
            partition = %record.partition_key(),
            state = %record.state,
            error = %error,
            "Failed to persist partition state; in-memory state kept"
        );
        self.publish(EngineEvent::PersistFailed {
            partition: record.partition_key(),
            state: record.state,
            error,
        });
    }

    /// Hand `result` to the sink. A panicking sink loses only its own copy.
    async fn deliver(&self, partition: &PartitionKey, result: TransitionResult) {
        let sink = Arc::clone(&self.sink);
        let message_id = result.message_id.clone();
        if let Err(panic) = tokio::spawn(async move { sink.deliver(result).await }).await {
            warn!(
                partition = %partition,
                message_id = %message_id,
                error = %panic,
                "Result sink panicked"
            );
        }
    }

    /// Fail a message its lane can no longer run.
    fn abandon(&self, item: LaneItem, partition: &PartitionKey) {
        self.queued
            .remove_if(&item.message.id, |_, queued| Arc::ptr_eq(&queued.slot, &item.slot));
        let Some(reply) = item.slot.try_start() else {
            return;
        };

        let result = TransitionResult::failure(
            &item.message.id,
            item.model.current_state(),
            ErrorKind::UserTransitionFailure,
            "lane worker stopped before the transition ran",
        );
        self.publish(EngineEvent::TransitionCompleted {
            partition: partition.clone(),
            factory: Some(item.factory.key().clone()),
            result: result.clone(),
        });
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let sink = Arc::clone(&self.sink);
            let delivered = result.clone();
            runtime.spawn(async move { sink.deliver(delivered).await });
        }
        let _ = reply.send(result);
    }
}

/// Owns a lane's receiver. However the worker ends, messages still sitting
/// in the channel get a result and the lane's map entry is released.
struct LaneGuard {
    inner: Arc<ExecutorInner>,
    partition: PartitionKey,
    id: u64,
    receiver: mpsc::UnboundedReceiver<LaneItem>,
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        self.receiver.close();
        let mut abandoned = 0usize;
        while let Ok(item) = self.receiver.try_recv() {
            self.inner.abandon(item, &self.partition);
            abandoned += 1;
        }
        let id = self.id;
        self.inner
            .lanes
            .remove_if(&self.partition, |_, lane| lane.id == id);

        if abandoned > 0 {
            warn!(
                partition = %self.partition,
                lane = id,
                abandoned,
                "Lane worker stopped with messages queued"
            );
        }
    }
}

/// Map a refusal from the instance to the reported result.
///
/// A from-state mismatch is a conflict only when the message was consistent
/// with what the lane expected at acceptance and a message accepted earlier
/// has since moved the partition. Anything else was out of date on arrival.
fn rejection_result(message_id: &str, rejection: Rejection, accepted: Accepted) -> TransitionResult {
    let Rejection {
        kind,
        detail,
        current_state,
        version,
    } = rejection;

    if kind == ErrorKind::StaleState && accepted.anticipated && version != accepted.version {
        return TransitionResult::failure(
            message_id,
            current_state,
            ErrorKind::ConflictingTransition,
            format!("superseded while queued: {detail}"),
        );
    }
    TransitionResult::failure(message_id, current_state, kind, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{InMemoryStateStore, NoopResultSink};
    use crate::config::EngineConfig;
    use crate::core::{FactoryKey, StateModelDefinition};
    use crate::executor::{QueuedMessage, TransitionExecutor};
    use crate::model::TransitionHandlers;
    use tokio::sync::oneshot;

    fn rejection(kind: ErrorKind, version: u64) -> Rejection {
        Rejection {
            kind,
            detail: "partition is in state MASTER".to_string(),
            current_state: "MASTER".to_string(),
            version,
        }
    }

    fn accepted(version: u64, anticipated: bool) -> Accepted {
        Accepted {
            version,
            anticipated,
        }
    }

    #[test]
    fn stale_on_arrival_stays_stale() {
        let result = rejection_result("m-1", rejection(ErrorKind::StaleState, 2), accepted(2, true));
        assert!(result.is_error(ErrorKind::StaleState));
        assert_eq!(result.resulting_state, "MASTER");
    }

    #[test]
    fn stale_after_intervening_change_is_conflict() {
        let result = rejection_result("m-1", rejection(ErrorKind::StaleState, 3), accepted(2, true));
        assert!(result.is_error(ErrorKind::ConflictingTransition));
        assert!(result
            .error_detail
            .unwrap()
            .starts_with("superseded while queued"));
    }

    #[test]
    fn unexpected_from_state_stays_stale_after_change() {
        let result = rejection_result("m-1", rejection(ErrorKind::StaleState, 3), accepted(2, false));
        assert!(result.is_error(ErrorKind::StaleState));
    }

    #[test]
    fn illegal_is_never_a_conflict() {
        let result =
            rejection_result("m-1", rejection(ErrorKind::IllegalTransition, 3), accepted(2, true));
        assert!(result.is_error(ErrorKind::IllegalTransition));
    }

    #[tokio::test]
    async fn stopped_lane_fails_messages_left_in_its_channel() {
        let executor = TransitionExecutor::new(
            EngineConfig::for_testing(),
            Arc::new(NoopResultSink),
            Arc::new(InMemoryStateStore::new()),
        );
        let inner = Arc::clone(&executor.inner);
        let factory = Arc::new(RegisteredFactory::new(
            FactoryKey::default_for("MasterSlave"),
            Arc::new(StateModelDefinition::master_slave()),
            Arc::new(|_: &PartitionKey| TransitionHandlers::new()),
        ));
        let partition = PartitionKey::new("TestDB", "TestDB_0");
        let message = Arc::new(TransitionMessage::new(
            "TestDB", "TestDB_0", "OFFLINE", "SLAVE", "MasterSlave",
        ));

        let (reply, receiver) = oneshot::channel();
        let slot = Arc::new(QueueSlot::new(reply));
        inner.queued.insert(
            message.id.clone(),
            QueuedMessage {
                partition: partition.clone(),
                slot: Arc::clone(&slot),
            },
        );
        let (sender, lane_receiver) = mpsc::unbounded_channel();
        let sent = sender.send(LaneItem {
            model: factory.get_or_create_state_model(&partition),
            factory,
            message,
            accepted: accepted(0, true),
            slot,
        });
        assert!(sent.is_ok());

        drop(LaneGuard {
            inner,
            partition,
            id: 0,
            receiver: lane_receiver,
        });

        let result = receiver.await.unwrap();
        assert!(result.is_error(ErrorKind::UserTransitionFailure));
        assert_eq!(result.resulting_state, "OFFLINE");
        assert_eq!(executor.queued_messages(), 0);
    }
}
