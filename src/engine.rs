//! # State Machine Engine
//!
//! The participant-side entry point. Wires the factory registry to the
//! transition executor and to the host's collaborators.

use crate::boundary::{ResultSink, StateStore};
use crate::checkpoint::{EngineCheckpoint, PartitionSnapshot};
use crate::config::EngineConfig;
use crate::core::{PartitionHistory, PartitionKey, StateModelDefinition};
use crate::error::ConfigError;
use crate::events::EngineEvent;
use crate::executor::{TransitionExecutor, TransitionHandle};
use crate::factory::StateModelFactory;
use crate::message::TransitionMessage;
use crate::model::StateModel;
use crate::registry::StateModelFactoryRegistry;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Participant state machine engine.
///
/// Created explicitly at startup and torn down with [`shutdown`](Self::shutdown);
/// there is no global instance.
///
/// # Example
///
/// ```rust
/// use participant_engine::boundary::{InMemoryStateStore, NoopResultSink};
/// use participant_engine::config::EngineConfig;
/// use participant_engine::core::{PartitionKey, StateModelDefinition};
/// use participant_engine::engine::StateMachineEngine;
/// use participant_engine::factory::StateModelFactory;
/// use participant_engine::message::TransitionMessage;
/// use participant_engine::model::TransitionHandlers;
/// use std::sync::Arc;
///
/// let rt = tokio::runtime::Builder::new_current_thread()
///     .enable_time()
///     .build()
///     .unwrap();
/// rt.block_on(async {
///     let engine = StateMachineEngine::new(
///         EngineConfig::default(),
///         Arc::new(NoopResultSink),
///         Arc::new(InMemoryStateStore::new()),
///     )
///     .unwrap();
///
///     let factory: Arc<dyn StateModelFactory> =
///         Arc::new(|_: &PartitionKey| TransitionHandlers::new());
///     engine.register_state_model_factory(Arc::new(StateModelDefinition::master_slave()), factory);
///
///     let msg = TransitionMessage::new("TestDB", "TestDB_0", "OFFLINE", "SLAVE", "MasterSlave");
///     let result = engine.accept(msg).await.unwrap();
///     assert!(result.success);
///
///     engine.shutdown().await;
/// });
/// ```
pub struct StateMachineEngine {
    registry: Arc<StateModelFactoryRegistry>,
    executor: TransitionExecutor,
}

impl StateMachineEngine {
    pub fn new(
        config: EngineConfig,
        sink: Arc<dyn ResultSink>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let registry = Arc::new(StateModelFactoryRegistry::with_history_limit(
            config.history_limit,
        ));
        info!(
            worker_pool_size = config.worker_pool_size,
            default_timeout_ms = config.default_transition_timeout_ms,
            "Starting state machine engine"
        );
        Ok(Self {
            registry,
            executor: TransitionExecutor::new(config, sink, store),
        })
    }

    pub fn registry(&self) -> &StateModelFactoryRegistry {
        &self.registry
    }

    pub fn executor(&self) -> &TransitionExecutor {
        &self.executor
    }

    pub fn register_state_model_factory(
        &self,
        definition: Arc<StateModelDefinition>,
        factory: Arc<dyn StateModelFactory>,
    ) -> bool {
        self.registry.register_state_model_factory(definition, factory)
    }

    pub fn register_named_state_model_factory(
        &self,
        definition: Arc<StateModelDefinition>,
        factory: Arc<dyn StateModelFactory>,
        factory_name: &str,
    ) -> bool {
        self.registry
            .register_named_state_model_factory(definition, factory, factory_name)
    }

    pub fn remove_state_model_factory(
        &self,
        definition: &str,
        factory: &Arc<dyn StateModelFactory>,
    ) -> bool {
        self.registry.remove_state_model_factory(definition, factory)
    }

    pub fn remove_named_state_model_factory(
        &self,
        definition: &str,
        factory: &Arc<dyn StateModelFactory>,
        factory_name: &str,
    ) -> bool {
        self.registry
            .remove_named_state_model_factory(definition, factory, factory_name)
    }

    /// Accept a transition message.
    ///
    /// Resolves the serving factory by definition name and tag (falling back
    /// to the default factory) and queues the message on its partition's
    /// lane. A message no factory serves resolves at once as
    /// `UNRESOLVED_FACTORY`.
    pub fn accept(&self, message: TransitionMessage) -> TransitionHandle {
        if self.executor.is_closed() {
            return self.executor.refuse(&message, "engine is shut down");
        }

        match self.registry.resolve_message(&message) {
            Some(factory) => self.executor.accept(message, factory),
            None => {
                let detail = match &message.factory_name {
                    Some(tag) => format!(
                        "no factory registered for {}/{} and no default",
                        message.definition_name, tag
                    ),
                    None => format!(
                        "no default factory registered for {}",
                        message.definition_name
                    ),
                };
                self.executor.refuse(&message, &detail)
            }
        }
    }

    /// Cancel a queued message by id. Running messages cannot be cancelled.
    pub fn cancel(&self, message_id: &str) -> bool {
        self.executor.cancel(message_id)
    }

    fn state_model(
        &self,
        definition: &str,
        factory_name: Option<&str>,
        partition: &PartitionKey,
    ) -> Option<Arc<StateModel>> {
        self.registry
            .resolve(definition, factory_name)?
            .get_state_model(partition)
    }

    /// Force a partition back to its initial state.
    ///
    /// Any transition in flight is fenced off, and messages queued behind it
    /// fail `CONFLICTING_TRANSITION`. Returns false if no instance exists.
    pub fn reset_partition(
        &self,
        definition: &str,
        factory_name: Option<&str>,
        partition: &PartitionKey,
    ) -> bool {
        match self.state_model(definition, factory_name, partition) {
            Some(model) => {
                model.reset();
                true
            }
            None => false,
        }
    }

    pub fn current_state(
        &self,
        definition: &str,
        factory_name: Option<&str>,
        partition: &PartitionKey,
    ) -> Option<String> {
        self.state_model(definition, factory_name, partition)
            .map(|model| model.current_state())
    }

    pub fn history(
        &self,
        definition: &str,
        factory_name: Option<&str>,
        partition: &PartitionKey,
    ) -> Option<PartitionHistory> {
        self.state_model(definition, factory_name, partition)
            .map(|model| model.history())
    }

    /// Snapshot the state of every cached instance.
    pub fn checkpoint(&self) -> EngineCheckpoint {
        let partitions = self
            .registry
            .factories()
            .into_iter()
            .flat_map(|factory| {
                factory
                    .state_models()
                    .into_iter()
                    .map(move |model| PartitionSnapshot {
                        factory: factory.key().clone(),
                        partition: model.partition().clone(),
                        state: model.current_state(),
                        version: model.version(),
                    })
            })
            .collect();
        EngineCheckpoint::new(partitions)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.executor.subscribe()
    }

    /// Stop accepting, drain every lane, then drop all factories and
    /// instances.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
        self.registry.clear();
        info!("State machine engine stopped");
    }
}

impl std::fmt::Debug for StateMachineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachineEngine")
            .field("factories", &self.registry.keys())
            .field("executor", &self.executor)
            .finish()
    }
}
