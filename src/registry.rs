//! Registry mapping (definition, factory tag) to a registered factory.

use crate::core::{FactoryKey, StateModelDefinition, DEFAULT_HISTORY_LIMIT};
use crate::factory::{RegisteredFactory, StateModelFactory};
use crate::message::TransitionMessage;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Registry of state model factories.
///
/// Every mutation reports its outcome as a `bool` instead of failing: a
/// duplicate registration or a removal of something that is not there is an
/// expected race during startup and shutdown, not an error.
///
/// # Example
///
/// ```rust
/// use participant_engine::core::{PartitionKey, StateModelDefinition};
/// use participant_engine::factory::StateModelFactory;
/// use participant_engine::model::TransitionHandlers;
/// use participant_engine::registry::StateModelFactoryRegistry;
/// use std::sync::Arc;
///
/// let registry = StateModelFactoryRegistry::new();
/// let def = Arc::new(StateModelDefinition::master_slave());
/// let factory: Arc<dyn StateModelFactory> =
///     Arc::new(|_: &PartitionKey| TransitionHandlers::new());
///
/// assert!(registry.register_state_model_factory(Arc::clone(&def), Arc::clone(&factory)));
/// assert!(!registry.register_state_model_factory(Arc::clone(&def), Arc::clone(&factory)));
/// assert!(registry.remove_state_model_factory("MasterSlave", &factory));
/// ```
pub struct StateModelFactoryRegistry {
    factories: DashMap<FactoryKey, Arc<RegisteredFactory>>,
    history_limit: usize,
}

impl Default for StateModelFactoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StateModelFactoryRegistry {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create a registry whose instances keep `history_limit` transitions.
    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            factories: DashMap::new(),
            history_limit,
        }
    }

    /// Register the default factory for `definition`.
    ///
    /// Returns false without effect if a default factory already exists for
    /// that definition name.
    pub fn register_state_model_factory(
        &self,
        definition: Arc<StateModelDefinition>,
        factory: Arc<dyn StateModelFactory>,
    ) -> bool {
        let key = FactoryKey::default_for(definition.name());
        self.register(key, definition, factory)
    }

    /// Register a factory under `factory_name` for `definition`.
    ///
    /// Returns false if that exact (definition, name) pair is registered.
    pub fn register_named_state_model_factory(
        &self,
        definition: Arc<StateModelDefinition>,
        factory: Arc<dyn StateModelFactory>,
        factory_name: &str,
    ) -> bool {
        let key = FactoryKey::named(definition.name(), factory_name);
        self.register(key, definition, factory)
    }

    /// Remove the default factory for `definition`.
    ///
    /// Returns false if none is registered or if the registered factory is a
    /// different instance from `factory`.
    pub fn remove_state_model_factory(
        &self,
        definition: &str,
        factory: &Arc<dyn StateModelFactory>,
    ) -> bool {
        self.remove(&FactoryKey::default_for(definition), factory)
    }

    /// Remove the factory registered under `factory_name` for `definition`.
    pub fn remove_named_state_model_factory(
        &self,
        definition: &str,
        factory: &Arc<dyn StateModelFactory>,
        factory_name: &str,
    ) -> bool {
        self.remove(&FactoryKey::named(definition, factory_name), factory)
    }

    fn register(
        &self,
        key: FactoryKey,
        definition: Arc<StateModelDefinition>,
        factory: Arc<dyn StateModelFactory>,
    ) -> bool {
        match self.factories.entry(key) {
            Entry::Occupied(occupied) => {
                warn!(factory = %occupied.key(), "Factory already registered");
                false
            }
            Entry::Vacant(vacant) => {
                let entry = RegisteredFactory::with_history_limit(
                    vacant.key().clone(),
                    definition,
                    factory,
                    self.history_limit,
                );
                info!(factory = %vacant.key(), "Registered state model factory");
                vacant.insert(Arc::new(entry));
                true
            }
        }
    }

    fn remove(&self, key: &FactoryKey, factory: &Arc<dyn StateModelFactory>) -> bool {
        match self
            .factories
            .remove_if(key, |_, registered| registered.is_factory(factory))
        {
            Some((key, registered)) => {
                // instances die with the registration
                registered.clear();
                info!(factory = %key, "Removed state model factory");
                true
            }
            None => {
                warn!(factory = %key, "No matching factory registration to remove");
                false
            }
        }
    }

    /// Find the factory registered under an exact key.
    pub fn get(&self, key: &FactoryKey) -> Option<Arc<RegisteredFactory>> {
        self.factories.get(key).map(|f| Arc::clone(f.value()))
    }

    /// Find the factory for a definition and optional tag.
    ///
    /// A tagged lookup that misses falls back to the default factory.
    pub fn resolve(
        &self,
        definition: &str,
        factory_name: Option<&str>,
    ) -> Option<Arc<RegisteredFactory>> {
        factory_name
            .and_then(|name| self.get(&FactoryKey::named(definition, name)))
            .or_else(|| self.get(&FactoryKey::default_for(definition)))
    }

    /// Find the factory serving `message`.
    pub fn resolve_message(&self, message: &TransitionMessage) -> Option<Arc<RegisteredFactory>> {
        self.resolve(&message.definition_name, message.factory_name.as_deref())
    }

    pub fn keys(&self) -> Vec<FactoryKey> {
        let mut keys: Vec<_> = self.factories.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn factories(&self) -> Vec<Arc<RegisteredFactory>> {
        self.factories
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Drop every registration and every cached instance.
    pub fn clear(&self) {
        for entry in self.factories.iter() {
            entry.value().clear();
        }
        self.factories.clear();
    }
}
