//! Builder for constructing state model definitions.

use crate::builder::error::{BuildError, DefinitionViolation};
use crate::core::{Edge, StateModelDefinition};
use std::collections::{BTreeSet, HashSet};
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

/// Builder for constructing definitions with a fluent API.
///
/// `build()` validates everything at once and reports every violation it
/// finds rather than stopping at the first.
///
/// # Example
///
/// ```rust
/// use participant_engine::builder::DefinitionBuilder;
///
/// let def = DefinitionBuilder::new("Cache")
///     .states(["OFFLINE", "WARM", "HOT", "DROPPED"])
///     .initial("OFFLINE")
///     .dropped("DROPPED")
///     .transition("OFFLINE", "WARM")
///     .transition("WARM", "HOT")
///     .transition("HOT", "WARM")
///     .build()
///     .unwrap();
///
/// assert!(def.allows("WARM", "HOT"));
/// assert!(def.allows("HOT", "DROPPED"));
/// ```
pub struct DefinitionBuilder {
    name: String,
    states: Vec<String>,
    initial: Option<String>,
    dropped: Option<String>,
    transitions: Vec<Edge>,
}

impl DefinitionBuilder {
    /// Create a new builder for the named definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            initial: None,
            dropped: None,
            transitions: Vec::new(),
        }
    }

    /// Declare one state.
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.states.push(state.into());
        self
    }

    /// Declare several states, in order.
    pub fn states<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.states.extend(states.into_iter().map(Into::into));
        self
    }

    /// Set the state new partitions start in (required).
    pub fn initial(mut self, state: impl Into<String>) -> Self {
        self.initial = Some(state.into());
        self
    }

    /// Set the state that marks a dropped partition (required).
    pub fn dropped(mut self, state: impl Into<String>) -> Self {
        self.dropped = Some(state.into());
        self
    }

    /// Add an edge to the transition table.
    pub fn transition(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transitions.push(Edge::new(from, to));
        self
    }

    /// Build the definition, accumulating all violations.
    pub fn build(self) -> Result<StateModelDefinition, BuildError> {
        match self.validate() {
            Validation::Success(_) => {}
            Validation::Failure(errors) => {
                return Err(BuildError::InvalidDefinition(
                    errors.iter().cloned().collect(),
                ))
            }
        }

        // validate() rejected missing initial/dropped states
        let (Some(initial), Some(dropped)) = (self.initial, self.dropped) else {
            return Err(BuildError::InvalidDefinition(vec![
                DefinitionViolation::MissingInitialState,
            ]));
        };

        let transitions: BTreeSet<Edge> = self.transitions.into_iter().collect();
        Ok(StateModelDefinition::from_validated_parts(
            self.name,
            self.states,
            initial,
            dropped,
            transitions,
        ))
    }

    fn validate(&self) -> Validation<(), NonEmptyVec<DefinitionViolation>> {
        let mut checks: Vec<Validation<(), NonEmptyVec<DefinitionViolation>>> = Vec::new();
        let declared: HashSet<&str> = self.states.iter().map(String::as_str).collect();

        if self.name.trim().is_empty() {
            checks.push(Validation::fail(DefinitionViolation::EmptyName));
        }

        if self.states.is_empty() {
            checks.push(Validation::fail(DefinitionViolation::NoStates));
        }

        let mut seen = HashSet::new();
        for state in &self.states {
            if !seen.insert(state.as_str()) {
                checks.push(Validation::fail(DefinitionViolation::DuplicateState(
                    state.clone(),
                )));
            }
        }

        let check = match &self.initial {
            None => Validation::fail(DefinitionViolation::MissingInitialState),
            Some(s) if !declared.contains(s.as_str()) => {
                Validation::fail(DefinitionViolation::UnknownInitialState(s.clone()))
            }
            Some(_) => Validation::success(()),
        };
        checks.push(check);

        let check = match &self.dropped {
            None => Validation::fail(DefinitionViolation::MissingDroppedState),
            Some(s) if !declared.contains(s.as_str()) => {
                Validation::fail(DefinitionViolation::UnknownDroppedState(s.clone()))
            }
            Some(_) => Validation::success(()),
        };
        checks.push(check);

        for edge in &self.transitions {
            if !declared.contains(edge.from.as_str()) || !declared.contains(edge.to.as_str()) {
                checks.push(Validation::fail(
                    DefinitionViolation::UnknownTransitionState {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                    },
                ));
            }
            if self.dropped.as_deref() == Some(edge.from.as_str()) {
                checks.push(Validation::fail(
                    DefinitionViolation::TransitionFromDropped {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                    },
                ));
            }
        }

        Validation::all_vec(checks).map(|_| ())
    }
}
