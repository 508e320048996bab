//! Builder API for state model definitions.
//!
//! This module provides a fluent builder and a macro for declaring
//! definitions, with validation that reports every problem at once.

pub mod definition;
pub mod error;
pub mod macros;

pub use definition::DefinitionBuilder;
pub use error::{BuildError, DefinitionViolation};
