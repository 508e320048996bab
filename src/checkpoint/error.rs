//! Checkpoint error types.

use thiserror::Error;

/// Encoding a checkpoint can be written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointFormat {
    Json,
    Binary,
}

impl std::fmt::Display for CheckpointFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckpointFormat::Json => f.write_str("JSON"),
            CheckpointFormat::Binary => f.write_str("binary"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Cannot encode checkpoint {id} ({partitions} partitions) as {format}: {reason}")]
    Encode {
        id: String,
        partitions: usize,
        format: CheckpointFormat,
        reason: String,
    },

    #[error("Cannot decode {format} checkpoint of {bytes} bytes: {reason}")]
    Decode {
        format: CheckpointFormat,
        bytes: usize,
        reason: String,
    },

    /// Written by an engine with a different checkpoint layout
    #[error("Checkpoint {id} uses format version {found}; this engine reads version {supported}")]
    UnsupportedVersion { id: String, found: u32, supported: u32 },
}
