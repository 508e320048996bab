//! Checkpoint functionality for the participant's partition states.
//!
//! A checkpoint captures the current state of every cached instance so a
//! host can inspect it, ship it to a dashboard, or compare it with what the
//! coordination service holds. Transition behaviors are not serializable and
//! are not part of a checkpoint.

use crate::core::{FactoryKey, PartitionKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;

pub use error::{CheckpointError, CheckpointFormat};

/// Version identifier for checkpoint format
pub const CHECKPOINT_VERSION: u32 = 1;

/// State of one partition under one factory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSnapshot {
    pub factory: FactoryKey,
    pub partition: PartitionKey,
    pub state: String,
    /// Number of state changes applied to the instance
    pub version: u64,
}

/// Serializable checkpoint of every cached partition instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineCheckpoint {
    /// Checkpoint format version
    pub version: u32,

    /// Unique checkpoint identifier
    pub id: String,

    /// When checkpoint was created
    pub timestamp: DateTime<Utc>,

    /// Partition states, sorted by factory then partition
    pub partitions: Vec<PartitionSnapshot>,
}

impl EngineCheckpoint {
    pub fn new(mut partitions: Vec<PartitionSnapshot>) -> Self {
        partitions.sort_by(|a, b| {
            a.factory
                .cmp(&b.factory)
                .then_with(|| a.partition.cmp(&b.partition))
        });
        Self {
            version: CHECKPOINT_VERSION,
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            partitions,
        }
    }

    /// Find the snapshot for a partition under a factory.
    pub fn find(&self, factory: &FactoryKey, partition: &PartitionKey) -> Option<&PartitionSnapshot> {
        self.partitions
            .iter()
            .find(|s| &s.factory == factory && &s.partition == partition)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn to_json(&self) -> Result<String, CheckpointError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| self.encode_error(CheckpointFormat::Json, e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, CheckpointError> {
        let checkpoint: Self = serde_json::from_str(json).map_err(|e| CheckpointError::Decode {
            format: CheckpointFormat::Json,
            bytes: json.len(),
            reason: e.to_string(),
        })?;
        checkpoint.check_version()
    }

    pub fn to_binary(&self) -> Result<Vec<u8>, CheckpointError> {
        bincode::serialize(self).map_err(|e| self.encode_error(CheckpointFormat::Binary, e.to_string()))
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self, CheckpointError> {
        let checkpoint: Self = bincode::deserialize(bytes).map_err(|e| CheckpointError::Decode {
            format: CheckpointFormat::Binary,
            bytes: bytes.len(),
            reason: e.to_string(),
        })?;
        checkpoint.check_version()
    }

    fn encode_error(&self, format: CheckpointFormat, reason: String) -> CheckpointError {
        CheckpointError::Encode {
            id: self.id.clone(),
            partitions: self.partitions.len(),
            format,
            reason,
        }
    }

    fn check_version(self) -> Result<Self, CheckpointError> {
        if self.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                id: self.id,
                found: self.version,
                supported: CHECKPOINT_VERSION,
            });
        }
        Ok(self)
    }
}
