//! Participant Engine: partition state machines for a cluster participant
//!
//! A cluster controller decides which state every partition of every
//! resource should be in on each participant and sends transition messages
//! to get there. This crate is the participant side: it resolves the factory
//! serving each message, keeps one state machine instance per partition,
//! validates and applies transitions strictly in order per partition, and
//! reports every outcome back.
//!
//! # Core Concepts
//!
//! - **Definition**: the legal states, initial state, dropped state and
//!   transition table of a resource type
//! - **Factory**: host-supplied behavior for a resource type, registered as
//!   the default or under a tag, with a per-partition instance cache
//! - **Lane**: the per-partition FIFO queue; one transition at a time per
//!   partition, many partitions in parallel
//! - **Generation token**: fences off behaviors that outlive their deadline
//!
//! # Example
//!
//! ```rust
//! use participant_engine::prelude::*;
//! use std::sync::Arc;
//!
//! let rt = tokio::runtime::Builder::new_current_thread()
//!     .enable_time()
//!     .build()
//!     .unwrap();
//! rt.block_on(async {
//!     let store = Arc::new(InMemoryStateStore::new());
//!     let engine = StateMachineEngine::new(
//!         EngineConfig::default(),
//!         Arc::new(NoopResultSink),
//!         store.clone(),
//!     )
//!     .unwrap();
//!
//!     let factory: Arc<dyn StateModelFactory> = Arc::new(|_: &PartitionKey| {
//!         TransitionHandlers::new().on("OFFLINE", "SLAVE", |ctx: TransitionContext| async move {
//!             println!("bootstrapping {}", ctx.partition);
//!             Ok::<(), TransitionFailure>(())
//!         })
//!     });
//!     engine.register_state_model_factory(Arc::new(StateModelDefinition::master_slave()), factory);
//!
//!     let first = engine.accept(TransitionMessage::new("TestDB", "TestDB_0", "OFFLINE", "SLAVE", "MasterSlave"));
//!     let second = engine.accept(TransitionMessage::new("TestDB", "TestDB_0", "SLAVE", "MASTER", "MasterSlave"));
//!     assert!(first.await.unwrap().success);
//!     assert_eq!(second.await.unwrap().resulting_state, "MASTER");
//!
//!     let record = store.get(&PartitionKey::new("TestDB", "TestDB_0")).unwrap();
//!     assert_eq!(record.state, "MASTER");
//!
//!     engine.shutdown().await;
//! });
//! ```

pub mod boundary;
pub mod builder;
pub mod checkpoint;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod factory;
pub mod message;
pub mod model;
pub mod registry;

// Re-export commonly used types
pub use boundary::{ResultSink, StateStore};
pub use config::EngineConfig;
pub use core::{FactoryKey, PartitionKey, StateModelDefinition};
pub use engine::StateMachineEngine;
pub use error::{ErrorKind, TransitionFailure};
pub use message::{TransitionMessage, TransitionResult};

pub mod prelude {
    pub use crate::boundary::{
        ChannelResultSink, InMemoryStateStore, NoopResultSink, PartitionStateRecord, ResultSink,
        StateStore,
    };
    pub use crate::builder::DefinitionBuilder;
    pub use crate::config::EngineConfig;
    pub use crate::core::{FactoryKey, PartitionKey, StateModelDefinition};
    pub use crate::engine::StateMachineEngine;
    pub use crate::error::{ErrorKind, StoreError, TransitionFailure};
    pub use crate::events::EngineEvent;
    pub use crate::executor::TransitionHandle;
    pub use crate::factory::StateModelFactory;
    pub use crate::message::{TransitionMessage, TransitionResult};
    pub use crate::model::{TransitionContext, TransitionHandler, TransitionHandlers};
}
