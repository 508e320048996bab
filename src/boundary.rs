//! Collaborator boundaries: the messaging layer and the coordination service.
//!
//! The engine does not deliver messages or persist anything itself. Hosts
//! plug their messaging client in as a [`ResultSink`] and their coordination
//! service client in as a [`StateStore`].

use crate::core::{FactoryKey, PartitionKey};
use crate::error::StoreError;
use crate::message::TransitionResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Receives the result of every accepted message, for return to the
/// controller.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn deliver(&self, result: TransitionResult);
}

/// Authoritative partition state as written to the coordination service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionStateRecord {
    pub resource_name: String,
    pub partition_name: String,
    pub factory: FactoryKey,
    pub state: String,
    pub session_id: String,
    pub message_id: String,
    pub updated_at: DateTime<Utc>,
}

impl PartitionStateRecord {
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(&self.resource_name, &self.partition_name)
    }
}

/// Persists partition state after each successful transition.
///
/// Writes are best-effort from the engine's point of view: an error is
/// reported to the host but never rolls back the applied transition.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn persist(&self, record: &PartitionStateRecord) -> Result<(), StoreError>;
}

/// Sink that discards results.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopResultSink;

#[async_trait]
impl ResultSink for NoopResultSink {
    async fn deliver(&self, _result: TransitionResult) {}
}

/// Sink that forwards results into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelResultSink {
    sender: mpsc::UnboundedSender<TransitionResult>,
}

impl ChannelResultSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransitionResult>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ResultSink for ChannelResultSink {
    async fn deliver(&self, result: TransitionResult) {
        if self.sender.send(result).is_err() {
            debug!("Result receiver dropped; discarding result");
        }
    }
}

/// Store that keeps the latest record per partition in memory.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    records: DashMap<PartitionKey, PartitionStateRecord>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, partition: &PartitionKey) -> Option<PartitionStateRecord> {
        self.records.get(partition).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn persist(&self, record: &PartitionStateRecord) -> Result<(), StoreError> {
        self.records.insert(record.partition_key(), record.clone());
        Ok(())
    }
}
