//! Notifications the engine publishes to its host.

use crate::core::{FactoryKey, PartitionKey};
use crate::error::StoreError;
use crate::message::TransitionResult;

/// Event published on the engine's broadcast channel.
///
/// Delivery is best-effort: events published while nobody is subscribed,
/// or that a lagging subscriber falls behind on, are lost.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    /// A message finished, successfully or not.
    TransitionCompleted {
        partition: PartitionKey,
        factory: Option<FactoryKey>,
        result: TransitionResult,
    },
    /// The coordination service rejected a state write. The in-memory state
    /// keeps the applied transition.
    PersistFailed {
        partition: PartitionKey,
        state: String,
        error: StoreError,
    },
    /// A behavior finished after its ticket was fenced off.
    StaleCompletionDiscarded {
        partition: PartitionKey,
        message_id: String,
        token: u64,
    },
    /// A queued message was cancelled before it ran.
    MessageCancelled {
        partition: PartitionKey,
        message_id: String,
    },
}

impl EngineEvent {
    pub fn partition(&self) -> &PartitionKey {
        match self {
            EngineEvent::TransitionCompleted { partition, .. }
            | EngineEvent::PersistFailed { partition, .. }
            | EngineEvent::StaleCompletionDiscarded { partition, .. }
            | EngineEvent::MessageCancelled { partition, .. } => partition,
        }
    }
}
