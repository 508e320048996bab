//! Error types shared across the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a transition message did not succeed.
///
/// This is the taxonomy reported back to the controller in every failed
/// [`TransitionResult`](crate::message::TransitionResult). The engine never
/// retries on any of these; a retry is a new message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// No factory serves the message's definition and tag
    UnresolvedFactory,
    /// The definition has no edge for (from, to)
    IllegalTransition,
    /// The message's from-state did not match the partition on arrival
    StaleState,
    /// A message accepted earlier changed the state while this one was queued
    ConflictingTransition,
    /// The user transition behavior returned an error
    UserTransitionFailure,
    /// The transition behavior did not finish before its deadline
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnresolvedFactory => "UNRESOLVED_FACTORY",
            ErrorKind::IllegalTransition => "ILLEGAL_TRANSITION",
            ErrorKind::StaleState => "STALE_STATE",
            ErrorKind::ConflictingTransition => "CONFLICTING_TRANSITION",
            ErrorKind::UserTransitionFailure => "USER_TRANSITION_FAILURE",
            ErrorKind::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a user transition behavior.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{detail}")]
pub struct TransitionFailure {
    pub detail: String,
}

impl TransitionFailure {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl From<String> for TransitionFailure {
    fn from(detail: String) -> Self {
        Self { detail }
    }
}

impl From<&str> for TransitionFailure {
    fn from(detail: &str) -> Self {
        Self::new(detail)
    }
}

/// Errors returned by a coordination-service store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Coordination service unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected for {resource}:{partition}: {reason}")]
    Rejected {
        resource: String,
        partition: String,
        reason: String,
    },

    #[error("State store panicked: {0}")]
    Panicked(String),
}

/// Errors raised while validating engine configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
