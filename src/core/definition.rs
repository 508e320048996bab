//! State model definitions.
//!
//! A definition declares the legal states of one resource type, the state a
//! fresh partition starts in, the state that marks a dropped partition, and
//! the directed edges a partition may move along.

use crate::builder::{BuildError, DefinitionBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Directed edge in a transition table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// Declared states and transitions for one resource type.
///
/// Definitions are only obtainable through [`DefinitionBuilder`] (or by
/// deserializing, which runs the same validation), so every value upholds:
///
/// - the initial and dropped states are declared states
/// - every edge connects declared states
/// - no edge leaves the dropped state
///
/// Moving to the dropped state is legal from every other state whether or not
/// the table lists that edge.
///
/// # Example
///
/// ```rust
/// use participant_engine::core::StateModelDefinition;
///
/// let def = StateModelDefinition::master_slave();
///
/// assert_eq!(def.initial_state(), "OFFLINE");
/// assert!(def.allows("OFFLINE", "SLAVE"));
/// assert!(!def.allows("OFFLINE", "MASTER"));
/// assert!(def.allows("MASTER", "DROPPED"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DefinitionSpec", into = "DefinitionSpec")]
pub struct StateModelDefinition {
    name: String,
    states: Vec<String>,
    initial_state: String,
    dropped_state: String,
    transitions: BTreeSet<Edge>,
}

/// Unvalidated wire form of a definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefinitionSpec {
    pub name: String,
    pub states: Vec<String>,
    pub initial_state: String,
    pub dropped_state: String,
    #[serde(default)]
    pub transitions: Vec<Edge>,
}

impl TryFrom<DefinitionSpec> for StateModelDefinition {
    type Error = BuildError;

    fn try_from(raw: DefinitionSpec) -> Result<Self, Self::Error> {
        let mut builder = DefinitionBuilder::new(raw.name)
            .states(raw.states)
            .initial(raw.initial_state)
            .dropped(raw.dropped_state);
        for edge in raw.transitions {
            builder = builder.transition(edge.from, edge.to);
        }
        builder.build()
    }
}

impl From<StateModelDefinition> for DefinitionSpec {
    fn from(def: StateModelDefinition) -> Self {
        Self {
            name: def.name,
            states: def.states,
            initial_state: def.initial_state,
            dropped_state: def.dropped_state,
            transitions: def.transitions.into_iter().collect(),
        }
    }
}

impl StateModelDefinition {
    pub(crate) fn from_validated_parts(
        name: String,
        states: Vec<String>,
        initial_state: String,
        dropped_state: String,
        transitions: BTreeSet<Edge>,
    ) -> Self {
        Self {
            name,
            states,
            initial_state,
            dropped_state,
            transitions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared states in declaration order.
    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    pub fn dropped_state(&self) -> &str {
        &self.dropped_state
    }

    /// Edges declared in the table, excluding the implicit drop edges.
    pub fn transitions(&self) -> impl Iterator<Item = &Edge> {
        self.transitions.iter()
    }

    pub fn is_state(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    pub fn is_dropped(&self, state: &str) -> bool {
        self.dropped_state == state
    }

    /// Check whether `from -> to` is a legal transition.
    ///
    /// Both endpoints must be declared states. Any non-dropped state may move
    /// to the dropped state; nothing leaves it.
    pub fn allows(&self, from: &str, to: &str) -> bool {
        if !self.is_state(from) || !self.is_state(to) || self.is_dropped(from) {
            return false;
        }
        if self.is_dropped(to) {
            return true;
        }
        self.transitions
            .iter()
            .any(|edge| edge.from == from && edge.to == to)
    }

    /// The classic master/slave replica model.
    pub fn master_slave() -> Self {
        Self::standard(
            "MasterSlave",
            &["OFFLINE", "SLAVE", "MASTER", "DROPPED"],
            &[
                ("OFFLINE", "SLAVE"),
                ("SLAVE", "MASTER"),
                ("MASTER", "SLAVE"),
                ("SLAVE", "OFFLINE"),
            ],
        )
    }

    /// Two-state model for partitions that are either served or not.
    pub fn online_offline() -> Self {
        Self::standard(
            "OnlineOffline",
            &["OFFLINE", "ONLINE", "DROPPED"],
            &[("OFFLINE", "ONLINE"), ("ONLINE", "OFFLINE")],
        )
    }

    /// Single-leader model with warm standbys.
    pub fn leader_standby() -> Self {
        Self::standard(
            "LeaderStandby",
            &["OFFLINE", "STANDBY", "LEADER", "DROPPED"],
            &[
                ("OFFLINE", "STANDBY"),
                ("STANDBY", "LEADER"),
                ("LEADER", "STANDBY"),
                ("STANDBY", "OFFLINE"),
            ],
        )
    }

    // The standard models share OFFLINE/DROPPED and are valid by construction.
    fn standard(name: &str, states: &[&str], edges: &[(&str, &str)]) -> Self {
        Self::from_validated_parts(
            name.to_string(),
            states.iter().map(|s| s.to_string()).collect(),
            "OFFLINE".to_string(),
            "DROPPED".to_string(),
            edges.iter().map(|(from, to)| Edge::new(*from, *to)).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_slave_declares_expected_edges() {
        let def = StateModelDefinition::master_slave();

        assert!(def.allows("OFFLINE", "SLAVE"));
        assert!(def.allows("SLAVE", "MASTER"));
        assert!(def.allows("MASTER", "SLAVE"));
        assert!(def.allows("SLAVE", "OFFLINE"));
        assert!(!def.allows("OFFLINE", "MASTER"));
        assert!(!def.allows("MASTER", "OFFLINE"));
    }

    #[test]
    fn dropped_is_reachable_from_every_state() {
        let def = StateModelDefinition::master_slave();
        for state in ["OFFLINE", "SLAVE", "MASTER"] {
            assert!(def.allows(state, "DROPPED"), "{state} -> DROPPED");
        }
    }

    #[test]
    fn dropped_state_is_terminal() {
        let def = StateModelDefinition::online_offline();
        assert!(!def.allows("DROPPED", "OFFLINE"));
        assert!(!def.allows("DROPPED", "DROPPED"));
    }

    #[test]
    fn unknown_states_are_never_legal() {
        let def = StateModelDefinition::leader_standby();
        assert!(!def.allows("OFFLINE", "ERROR"));
        assert!(!def.allows("ERROR", "DROPPED"));
        assert!(!def.is_state("ERROR"));
    }

    #[test]
    fn standard_definitions_pass_builder_validation() {
        for def in [
            StateModelDefinition::master_slave(),
            StateModelDefinition::online_offline(),
            StateModelDefinition::leader_standby(),
        ] {
            let raw = DefinitionSpec::from(def.clone());
            let rebuilt = StateModelDefinition::try_from(raw).unwrap();
            assert_eq!(rebuilt, def);
        }
    }

    #[test]
    fn deserialization_rejects_invalid_definition() {
        let json = r#"{
            "name": "Broken",
            "states": ["OFFLINE", "ONLINE"],
            "initial_state": "OFFLINE",
            "dropped_state": "DROPPED",
            "transitions": [{"from": "OFFLINE", "to": "ONLINE"}]
        }"#;

        let result: Result<StateModelDefinition, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn definition_serializes_to_wire_form() {
        let def = StateModelDefinition::online_offline();
        let json = serde_json::to_string(&def).unwrap();
        let back: StateModelDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(def, back);
    }
}
