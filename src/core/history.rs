//! Per-partition transition history.
//!
//! Records the transitions a partition has applied, oldest first, bounded to
//! a fixed number of entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// How a recorded state change came about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Applied by a validated transition message
    Transition,
    /// Forced by an administrative reset
    Reset,
}

/// Record of a single applied state change.
///
/// # Example
///
/// ```rust
/// use participant_engine::core::{ChangeKind, StateTransition};
/// use chrono::Utc;
///
/// let transition = StateTransition {
///     from: "OFFLINE".to_string(),
///     to: "SLAVE".to_string(),
///     message_id: Some("msg-1".to_string()),
///     kind: ChangeKind::Transition,
///     timestamp: Utc::now(),
/// };
/// assert_eq!(transition.to, "SLAVE");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// The state being transitioned from
    pub from: String,
    /// The state being transitioned to
    pub to: String,
    /// Message that caused the change; `None` for resets
    pub message_id: Option<String>,
    pub kind: ChangeKind,
    /// When the change was applied
    pub timestamp: DateTime<Utc>,
}

/// Bounded, ordered history of applied state changes.
///
/// Once `limit` entries are held, recording a new one evicts the oldest.
///
/// # Example
///
/// ```rust
/// use participant_engine::core::{ChangeKind, PartitionHistory, StateTransition};
/// use chrono::Utc;
///
/// let mut history = PartitionHistory::with_limit(8);
/// for (from, to) in [("OFFLINE", "SLAVE"), ("SLAVE", "MASTER")] {
///     history.record(StateTransition {
///         from: from.to_string(),
///         to: to.to_string(),
///         message_id: None,
///         kind: ChangeKind::Transition,
///         timestamp: Utc::now(),
///     });
/// }
///
/// assert_eq!(history.get_path(), vec!["OFFLINE", "SLAVE", "MASTER"]);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PartitionHistory {
    transitions: VecDeque<StateTransition>,
    limit: usize,
}

/// Entries kept when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 64;

impl Default for PartitionHistory {
    fn default() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl PartitionHistory {
    /// Create an empty history holding at most `limit` entries (minimum 1).
    pub fn with_limit(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            transitions: VecDeque::with_capacity(limit.min(DEFAULT_HISTORY_LIMIT)),
            limit,
        }
    }

    /// Record a change, evicting the oldest entry when full.
    pub fn record(&mut self, transition: StateTransition) {
        if self.transitions.len() == self.limit {
            self.transitions.pop_front();
        }
        self.transitions.push_back(transition);
    }

    /// Get the path of states traversed.
    ///
    /// Returns the `from` of the oldest retained entry followed by the `to`
    /// of every entry.
    pub fn get_path(&self) -> Vec<&str> {
        let mut path = Vec::with_capacity(self.transitions.len() + 1);
        if let Some(first) = self.transitions.front() {
            path.push(first.from.as_str());
        }
        for transition in &self.transitions {
            path.push(transition.to.as_str());
        }
        path
    }

    /// Time between the oldest and newest retained entries.
    pub fn duration(&self) -> Option<Duration> {
        let (first, last) = (self.transitions.front()?, self.transitions.back()?);
        last.timestamp
            .signed_duration_since(first.timestamp)
            .to_std()
            .ok()
    }

    pub fn transitions(&self) -> impl Iterator<Item = &StateTransition> {
        self.transitions.iter()
    }

    pub fn last(&self) -> Option<&StateTransition> {
        self.transitions.back()
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(from: &str, to: &str) -> StateTransition {
        StateTransition {
            from: from.to_string(),
            to: to.to_string(),
            message_id: None,
            kind: ChangeKind::Transition,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn new_history_is_empty() {
        let history = PartitionHistory::default();
        assert!(history.is_empty());
        assert!(history.get_path().is_empty());
        assert!(history.duration().is_none());
    }

    #[test]
    fn get_path_returns_state_sequence() {
        let mut history = PartitionHistory::default();
        history.record(change("OFFLINE", "SLAVE"));
        history.record(change("SLAVE", "MASTER"));

        assert_eq!(history.get_path(), vec!["OFFLINE", "SLAVE", "MASTER"]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn oldest_entries_are_evicted_at_limit() {
        let mut history = PartitionHistory::with_limit(2);
        history.record(change("OFFLINE", "SLAVE"));
        history.record(change("SLAVE", "MASTER"));
        history.record(change("MASTER", "SLAVE"));

        assert_eq!(history.len(), 2);
        assert_eq!(history.get_path(), vec!["SLAVE", "MASTER", "SLAVE"]);
    }

    #[test]
    fn zero_limit_still_keeps_latest() {
        let mut history = PartitionHistory::with_limit(0);
        history.record(change("OFFLINE", "ONLINE"));
        history.record(change("ONLINE", "OFFLINE"));

        assert_eq!(history.len(), 1);
        assert_eq!(history.last().unwrap().to, "OFFLINE");
    }

    #[test]
    fn duration_calculates_elapsed_time() {
        let mut history = PartitionHistory::default();
        history.record(change("OFFLINE", "SLAVE"));
        std::thread::sleep(std::time::Duration::from_millis(10));
        history.record(change("SLAVE", "MASTER"));

        let duration = history.duration().unwrap();
        assert!(duration >= std::time::Duration::from_millis(10));
    }

    #[test]
    fn history_serializes_correctly() {
        let mut history = PartitionHistory::default();
        history.record(change("OFFLINE", "SLAVE"));

        let json = serde_json::to_string(&history).unwrap();
        let deserialized: PartitionHistory = serde_json::from_str(&json).unwrap();

        assert_eq!(history.len(), deserialized.len());
        assert_eq!(deserialized.get_path(), vec!["OFFLINE", "SLAVE"]);
    }
}
