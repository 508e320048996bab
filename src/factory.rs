//! State model factories and their per-partition caches.

use crate::core::{FactoryKey, PartitionKey, StateModelDefinition, DEFAULT_HISTORY_LIMIT};
use crate::model::{StateModel, TransitionHandlers};
use dashmap::DashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Pluggable behavior for one resource type.
///
/// Host code implements this once per kind of resource it serves and
/// registers it with the engine. The engine calls it the first time a
/// partition is referenced; the returned handlers drive that partition for
/// as long as it stays on this participant.
///
/// Closures `Fn(&PartitionKey) -> TransitionHandlers` implement this trait.
pub trait StateModelFactory: Send + Sync {
    fn create_state_model(&self, partition: &PartitionKey) -> TransitionHandlers;
}

impl<F> StateModelFactory for F
where
    F: Fn(&PartitionKey) -> TransitionHandlers + Send + Sync,
{
    fn create_state_model(&self, partition: &PartitionKey) -> TransitionHandlers {
        (self)(partition)
    }
}

/// Cache slot for one partition. Filled at most once, outside the map lock.
type ModelCell = Arc<OnceLock<Arc<StateModel>>>;

/// A registered factory together with the instances it created.
///
/// The cache is sharded by partition key. Host factory code runs with no
/// shard lock held, so creating one partition never blocks lookups of
/// unrelated partitions, and a factory may itself read the cache.
pub struct RegisteredFactory {
    key: FactoryKey,
    definition: Arc<StateModelDefinition>,
    factory: Arc<dyn StateModelFactory>,
    models: DashMap<PartitionKey, ModelCell>,
    history_limit: usize,
}

impl RegisteredFactory {
    pub fn new(
        key: FactoryKey,
        definition: Arc<StateModelDefinition>,
        factory: Arc<dyn StateModelFactory>,
    ) -> Self {
        Self::with_history_limit(key, definition, factory, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(
        key: FactoryKey,
        definition: Arc<StateModelDefinition>,
        factory: Arc<dyn StateModelFactory>,
        history_limit: usize,
    ) -> Self {
        Self {
            key,
            definition,
            factory,
            models: DashMap::new(),
            history_limit,
        }
    }

    pub fn key(&self) -> &FactoryKey {
        &self.key
    }

    pub fn definition(&self) -> &Arc<StateModelDefinition> {
        &self.definition
    }

    /// Whether `factory` is the same instance this entry was registered with.
    pub fn is_factory(&self, factory: &Arc<dyn StateModelFactory>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.factory), Arc::as_ptr(factory))
    }

    /// Return the cached instance, creating it in the initial state if absent.
    ///
    /// Concurrent callers for the same key all receive the same instance;
    /// the factory runs once per key.
    pub fn get_or_create_state_model(&self, partition: &PartitionKey) -> Arc<StateModel> {
        let cell = match self.models.get(partition) {
            Some(cell) => Arc::clone(cell.value()),
            None => Arc::clone(self.models.entry(partition.clone()).or_default().value()),
        };

        let model = cell.get_or_init(|| {
            debug!(factory = %self.key, partition = %partition, "Creating state model");
            let handlers = self.factory.create_state_model(partition);
            Arc::new(StateModel::with_history_limit(
                partition.clone(),
                Arc::clone(&self.definition),
                handlers,
                self.history_limit,
            ))
        });
        Arc::clone(model)
    }

    /// The cached instance, if one has been created.
    pub fn get_state_model(&self, partition: &PartitionKey) -> Option<Arc<StateModel>> {
        self.models
            .get(partition)
            .and_then(|cell| cell.get().map(Arc::clone))
    }

    /// Evict the cached instance. No-op if absent.
    pub fn remove_state_model(&self, partition: &PartitionKey) -> Option<Arc<StateModel>> {
        let removed = self
            .models
            .remove(partition)
            .and_then(|(_, cell)| cell.get().map(Arc::clone));
        if removed.is_some() {
            debug!(factory = %self.key, partition = %partition, "Evicted state model");
        }
        removed
    }

    /// Evict `model` only if it is still the cached instance for its key.
    pub(crate) fn evict_if_current(&self, model: &Arc<StateModel>) -> bool {
        self.models
            .remove_if(model.partition(), |_, cell| {
                cell.get().is_some_and(|cached| Arc::ptr_eq(cached, model))
            })
            .is_some()
    }

    pub fn partitions(&self) -> Vec<PartitionKey> {
        self.models
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn state_models(&self) -> Vec<Arc<StateModel>> {
        self.models
            .iter()
            .filter_map(|entry| entry.value().get().map(Arc::clone))
            .collect()
    }

    /// Number of created instances.
    pub fn len(&self) -> usize {
        self.models
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear(&self) {
        self.models.clear();
    }
}

impl std::fmt::Debug for RegisteredFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredFactory")
            .field("key", &self.key)
            .field("definition", &self.definition.name())
            .field("models", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registered(created: Arc<AtomicUsize>) -> RegisteredFactory {
        let factory: Arc<dyn StateModelFactory> = Arc::new(move |_: &PartitionKey| {
            created.fetch_add(1, Ordering::SeqCst);
            TransitionHandlers::new()
        });
        RegisteredFactory::new(
            FactoryKey::default_for("MasterSlave"),
            Arc::new(StateModelDefinition::master_slave()),
            factory,
        )
    }

    #[test]
    fn creates_once_and_caches() {
        let created = Arc::new(AtomicUsize::new(0));
        let entry = registered(Arc::clone(&created));
        let key = PartitionKey::new("TestDB", "TestDB_0");

        let first = entry.get_or_create_state_model(&key);
        let second = entry.get_or_create_state_model(&key);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(first.current_state(), "OFFLINE");
    }

    #[test]
    fn concurrent_creation_yields_one_instance() {
        let created = Arc::new(AtomicUsize::new(0));
        let entry = Arc::new(registered(Arc::clone(&created)));
        let key = PartitionKey::new("TestDB", "TestDB_1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let entry = Arc::clone(&entry);
                let key = key.clone();
                std::thread::spawn(move || entry.get_or_create_state_model(&key))
            })
            .collect();
        let models: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert!(models.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let entry = registered(Arc::new(AtomicUsize::new(0)));
        let key = PartitionKey::new("TestDB", "TestDB_2");

        assert!(entry.remove_state_model(&key).is_none());
        entry.get_or_create_state_model(&key);
        assert!(entry.remove_state_model(&key).is_some());
        assert!(entry.is_empty());
    }

    #[test]
    fn evict_if_current_ignores_replaced_instance() {
        let entry = registered(Arc::new(AtomicUsize::new(0)));
        let key = PartitionKey::new("TestDB", "TestDB_3");

        let old = entry.get_or_create_state_model(&key);
        entry.remove_state_model(&key);
        let fresh = entry.get_or_create_state_model(&key);

        assert!(!entry.evict_if_current(&old));
        assert!(entry.get_state_model(&key).is_some());
        assert!(entry.evict_if_current(&fresh));
        assert!(entry.get_state_model(&key).is_none());
    }

    #[test]
    fn slow_creation_does_not_stall_other_partitions() {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let slow = PartitionKey::new("TestDB", "TestDB_slow");
        let slow_key = slow.clone();

        let factory: Arc<dyn StateModelFactory> = Arc::new(move |partition: &PartitionKey| {
            if *partition == slow_key {
                entered_tx.send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
            }
            TransitionHandlers::new()
        });
        let entry = Arc::new(RegisteredFactory::new(
            FactoryKey::default_for("MasterSlave"),
            Arc::new(StateModelDefinition::master_slave()),
            factory,
        ));

        let creating = {
            let entry = Arc::clone(&entry);
            let slow = slow.clone();
            std::thread::spawn(move || entry.get_or_create_state_model(&slow))
        };
        entered_rx.recv().unwrap();

        // every other key is served while the slow factory is still running
        for i in 0..64 {
            let key = PartitionKey::new("TestDB", format!("TestDB_{}", i));
            assert_eq!(entry.get_or_create_state_model(&key).current_state(), "OFFLINE");
        }
        assert!(entry.get_state_model(&slow).is_none());
        assert_eq!(entry.len(), 64);

        release_tx.send(()).unwrap();
        let created = creating.join().unwrap();
        assert!(Arc::ptr_eq(&created, &entry.get_state_model(&slow).unwrap()));
        assert_eq!(entry.len(), 65);
    }

    #[test]
    fn factory_identity_is_by_instance() {
        let factory: Arc<dyn StateModelFactory> =
            Arc::new(|_: &PartitionKey| TransitionHandlers::new());
        let other: Arc<dyn StateModelFactory> =
            Arc::new(|_: &PartitionKey| TransitionHandlers::new());
        let entry = RegisteredFactory::new(
            FactoryKey::default_for("OnlineOffline"),
            Arc::new(StateModelDefinition::online_offline()),
            Arc::clone(&factory),
        );

        assert!(entry.is_factory(&factory));
        assert!(!entry.is_factory(&other));
    }
}
