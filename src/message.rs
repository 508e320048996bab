//! Inbound transition instructions and outbound results.

use crate::core::PartitionKey;
use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// A state-transition instruction sent by the controller.
///
/// Messages are immutable once accepted by the engine.
///
/// # Example
///
/// ```rust
/// use participant_engine::message::TransitionMessage;
///
/// let msg = TransitionMessage::new("TestDB", "TestDB_0", "OFFLINE", "SLAVE", "MasterSlave")
///     .with_factory("A")
///     .with_session("session-42");
///
/// assert_eq!(msg.factory_name.as_deref(), Some("A"));
/// assert_eq!(msg.partition_key().to_string(), "TestDB:TestDB_0");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitionMessage {
    pub id: String,
    pub resource_name: String,
    pub partition_name: String,
    pub from_state: String,
    pub to_state: String,
    #[serde(rename = "state_model_definition_name")]
    pub definition_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory_name: Option<String>,
    /// Controller session that issued the message
    pub session_id: String,
    /// Absolute deadline; when absent the engine's default timeout applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

impl TransitionMessage {
    /// Create a message with a fresh id, no factory tag and no deadline.
    pub fn new(
        resource: impl Into<String>,
        partition: impl Into<String>,
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            resource_name: resource.into(),
            partition_name: partition.into(),
            from_state: from_state.into(),
            to_state: to_state.into(),
            definition_name: definition.into(),
            factory_name: None,
            session_id: String::new(),
            deadline: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_factory(mut self, factory_name: impl Into<String>) -> Self {
        self.factory_name = Some(factory_name.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let deadline = Utc::now()
            .checked_add_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.with_deadline(deadline)
    }

    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::new(&self.resource_name, &self.partition_name)
    }
}

/// Outcome of one accepted message, returned to the controller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionResult {
    pub message_id: String,
    pub success: bool,
    /// Partition state after the message was handled
    pub resulting_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl TransitionResult {
    pub fn success(message_id: impl Into<String>, resulting_state: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            success: true,
            resulting_state: resulting_state.into(),
            error_kind: None,
            error_detail: None,
        }
    }

    pub fn failure(
        message_id: impl Into<String>,
        resulting_state: impl Into<String>,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            success: false,
            resulting_state: resulting_state.into(),
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
        }
    }

    /// Failure for a message no factory could serve.
    ///
    /// No instance exists, so the resulting state echoes the message's
    /// from-state.
    pub fn unresolved(message: &TransitionMessage, detail: impl Into<String>) -> Self {
        Self::failure(
            &message.id,
            &message.from_state,
            ErrorKind::UnresolvedFactory,
            detail,
        )
    }

    pub fn is_error(&self, kind: ErrorKind) -> bool {
        self.error_kind == Some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_message_has_unique_id() {
        let a = TransitionMessage::new("R", "R_0", "OFFLINE", "SLAVE", "MasterSlave");
        let b = TransitionMessage::new("R", "R_0", "OFFLINE", "SLAVE", "MasterSlave");
        assert_ne!(a.id, b.id);
        assert!(a.factory_name.is_none());
        assert!(a.deadline.is_none());
    }

    #[test]
    fn with_timeout_sets_future_deadline() {
        let msg = TransitionMessage::new("R", "R_0", "OFFLINE", "SLAVE", "MasterSlave")
            .with_timeout(Duration::from_secs(5));
        assert!(msg.deadline.unwrap() > Utc::now());
    }

    #[test]
    fn message_uses_controller_field_names() {
        let msg = TransitionMessage::new("R", "R_0", "OFFLINE", "SLAVE", "MasterSlave")
            .with_id("m-1");
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["state_model_definition_name"], "MasterSlave");
        assert!(json.get("factory_name").is_none());
        assert!(json.get("deadline").is_none());
    }

    #[test]
    fn failure_result_carries_kind_and_detail() {
        let result = TransitionResult::failure("m-1", "MASTER", ErrorKind::StaleState, "expected OFFLINE");
        assert!(!result.success);
        assert!(result.is_error(ErrorKind::StaleState));
        assert_eq!(result.error_detail.as_deref(), Some("expected OFFLINE"));
    }

    #[test]
    fn unresolved_result_echoes_from_state() {
        let msg = TransitionMessage::new("R", "R_0", "OFFLINE", "SLAVE", "Unknown");
        let result = TransitionResult::unresolved(&msg, "no factory");
        assert_eq!(result.resulting_state, "OFFLINE");
        assert!(result.is_error(ErrorKind::UnresolvedFactory));
    }
}
