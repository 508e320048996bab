//! Core data types of the engine.
//!
//! This module contains the plain data the rest of the engine is built on:
//! - State model definitions and their transition tables
//! - Factory and partition keys
//! - Bounded per-partition history
//!
//! Nothing here performs I/O or spawns tasks.

mod definition;
mod history;
mod keys;

pub use definition::{DefinitionSpec, Edge, StateModelDefinition};
pub use history::{
    ChangeKind, PartitionHistory, StateTransition, DEFAULT_HISTORY_LIMIT,
};
pub use keys::{FactoryKey, PartitionKey, DEFAULT_FACTORY_NAME};
