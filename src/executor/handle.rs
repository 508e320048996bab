//! Handles returned for accepted messages.

use crate::core::PartitionKey;
use crate::message::TransitionResult;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

enum SlotState {
    Queued(oneshot::Sender<TransitionResult>),
    Running,
    Cancelled,
}

/// Lifecycle of one queued message, shared between its handle and its lane.
///
/// The slot owns the reply channel until the lane claims it, so cancelling
/// drops the sender and wakes the waiting handle immediately.
pub(crate) struct QueueSlot {
    state: Mutex<SlotState>,
}

impl QueueSlot {
    pub(crate) fn new(reply: oneshot::Sender<TransitionResult>) -> Self {
        Self {
            state: Mutex::new(SlotState::Queued(reply)),
        }
    }

    /// Claim the slot for execution, taking the reply channel.
    ///
    /// Returns `None` if the message was cancelled.
    pub(crate) fn try_start(&self) -> Option<oneshot::Sender<TransitionResult>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Running) {
            SlotState::Queued(reply) => Some(reply),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Cancel the slot. Fails once execution has started.
    pub(crate) fn try_cancel(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Queued(_)) {
            *state = SlotState::Cancelled;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Cancelled)
    }
}

impl std::fmt::Debug for QueueSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match *self.state.lock() {
            SlotState::Queued(_) => "queued",
            SlotState::Running => "running",
            SlotState::Cancelled => "cancelled",
        };
        f.debug_struct("QueueSlot").field("state", &state).finish()
    }
}

/// Resolves to the result of one accepted message.
///
/// Awaiting the handle yields `Some(result)` once the message has been
/// handled, or `None` if it was cancelled while still queued.
#[derive(Debug)]
pub struct TransitionHandle {
    message_id: String,
    partition: PartitionKey,
    receiver: oneshot::Receiver<TransitionResult>,
    slot: Option<Arc<QueueSlot>>,
}

impl TransitionHandle {
    pub(crate) fn queued(
        message_id: String,
        partition: PartitionKey,
        receiver: oneshot::Receiver<TransitionResult>,
        slot: Arc<QueueSlot>,
    ) -> Self {
        Self {
            message_id,
            partition,
            receiver,
            slot: Some(slot),
        }
    }

    /// A handle that is already resolved, for messages refused at acceptance.
    pub(crate) fn resolved(partition: PartitionKey, result: TransitionResult) -> Self {
        let (sender, receiver) = oneshot::channel();
        let message_id = result.message_id.clone();
        // receiver is alive here
        let _ = sender.send(result);
        Self {
            message_id,
            partition,
            receiver,
            slot: None,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    /// Cancel the message if it has not started executing.
    ///
    /// Prefer [`StateMachineEngine::cancel`](crate::engine::StateMachineEngine::cancel)
    /// when the host should be notified; this only flips the slot.
    pub fn cancel(&self) -> bool {
        self.slot.as_ref().is_some_and(|slot| slot.try_cancel())
    }

    pub fn is_cancelled(&self) -> bool {
        self.slot.as_ref().is_some_and(|slot| slot.is_cancelled())
    }

    /// Wait for the result.
    pub async fn wait(self) -> Option<TransitionResult> {
        self.await
    }
}

impl Future for TransitionHandle {
    type Output = Option<TransitionResult>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(Result::ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(id: &str) -> (TransitionHandle, Arc<QueueSlot>) {
        let (sender, receiver) = oneshot::channel();
        let slot = Arc::new(QueueSlot::new(sender));
        let handle = TransitionHandle::queued(
            id.to_string(),
            PartitionKey::new("R", "R_0"),
            receiver,
            Arc::clone(&slot),
        );
        (handle, slot)
    }

    #[tokio::test]
    async fn resolved_handle_yields_result() {
        let handle = TransitionHandle::resolved(
            PartitionKey::new("R", "R_0"),
            TransitionResult::success("m-1", "ONLINE"),
        );

        assert_eq!(handle.message_id(), "m-1");
        assert!(!handle.cancel());
        let result = handle.wait().await.unwrap();
        assert_eq!(result.resulting_state, "ONLINE");
    }

    #[tokio::test]
    async fn cancelled_handle_resolves_to_none() {
        let (handle, slot) = queued("m-2");

        assert!(handle.cancel());
        assert!(handle.is_cancelled());
        assert!(slot.try_start().is_none());
        assert!(handle.await.is_none());
    }

    #[tokio::test]
    async fn started_slot_delivers_result() {
        let (handle, slot) = queued("m-3");

        let reply = slot.try_start().unwrap();
        assert!(!handle.cancel());
        reply.send(TransitionResult::success("m-3", "SLAVE")).unwrap();

        assert_eq!(handle.await.unwrap().resulting_state, "SLAVE");
    }

    #[test]
    fn slot_starts_only_once() {
        let (_handle, slot) = queued("m-4");
        assert!(slot.try_start().is_some());
        assert!(slot.try_start().is_none());
        assert!(!slot.is_cancelled());
    }
}
