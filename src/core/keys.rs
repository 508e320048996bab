//! Lookup keys for factories and partitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Factory name used when a factory is registered without a tag.
pub const DEFAULT_FACTORY_NAME: &str = "DEFAULT";

/// Identifies one factory registration: a definition name plus a factory tag.
///
/// A factory registered without a tag lives under [`DEFAULT_FACTORY_NAME`].
///
/// # Example
///
/// ```rust
/// use participant_engine::core::FactoryKey;
///
/// let default = FactoryKey::default_for("MasterSlave");
/// let named = FactoryKey::named("MasterSlave", "A");
///
/// assert!(default.is_default());
/// assert!(!named.is_default());
/// assert_ne!(default, named);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactoryKey {
    /// Name of the state model definition
    pub definition: String,
    /// Factory tag, `DEFAULT` for the untagged registration
    pub factory_name: String,
}

impl FactoryKey {
    pub fn default_for(definition: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            factory_name: DEFAULT_FACTORY_NAME.to_string(),
        }
    }

    pub fn named(definition: impl Into<String>, factory_name: impl Into<String>) -> Self {
        Self {
            definition: definition.into(),
            factory_name: factory_name.into(),
        }
    }

    pub fn is_default(&self) -> bool {
        self.factory_name == DEFAULT_FACTORY_NAME
    }
}

impl fmt::Display for FactoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.definition, self.factory_name)
    }
}

/// Identifies one partition of one resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub resource: String,
    pub partition: String,
}

impl PartitionKey {
    pub fn new(resource: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            partition: partition.into(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.partition)
    }
}
