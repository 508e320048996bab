//! Build errors for state model definitions.

use thiserror::Error;

/// A single problem found while validating a definition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionViolation {
    #[error("Definition name is empty")]
    EmptyName,

    #[error("No states declared")]
    NoStates,

    #[error("State '{0}' is declared more than once")]
    DuplicateState(String),

    #[error("Initial state not specified. Call .initial(state) before .build()")]
    MissingInitialState,

    #[error("Dropped state not specified. Call .dropped(state) before .build()")]
    MissingDroppedState,

    #[error("Initial state '{0}' is not a declared state")]
    UnknownInitialState(String),

    #[error("Dropped state '{0}' is not a declared state")]
    UnknownDroppedState(String),

    #[error("Transition {from} -> {to} references an undeclared state")]
    UnknownTransitionState { from: String, to: String },

    #[error("Transition {from} -> {to} leaves the dropped state")]
    TransitionFromDropped { from: String, to: String },
}

/// Errors that can occur when building a state model definition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Invalid state model definition: {}", format_violations(.0))]
    InvalidDefinition(Vec<DefinitionViolation>),
}

impl BuildError {
    /// All violations reported by validation.
    pub fn violations(&self) -> &[DefinitionViolation] {
        match self {
            BuildError::InvalidDefinition(violations) => violations,
        }
    }
}

fn format_violations(violations: &[DefinitionViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
