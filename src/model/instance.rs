//! Per-partition state model instance.

use crate::core::{
    ChangeKind, Edge, PartitionHistory, PartitionKey, StateModelDefinition, StateTransition,
    DEFAULT_HISTORY_LIMIT,
};
use crate::error::{ErrorKind, TransitionFailure};
use crate::message::{TransitionMessage, TransitionResult};
use crate::model::handler::{TransitionContext, TransitionHandler, TransitionHandlers};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why a message was refused before its behavior ran.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub kind: ErrorKind,
    pub detail: String,
    /// Partition state at the time of refusal
    pub current_state: String,
    /// Number of state changes applied so far
    pub version: u64,
}

/// Identifies one started transition for fencing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionTicket {
    pub token: u64,
    pub edge: Edge,
    pub message_id: String,
}

/// A validated transition whose behavior has not run yet.
///
/// Produced by [`StateModel::begin`]. Running it does not touch the instance;
/// the outcome must be handed back through [`StateModel::complete`].
pub struct PreparedTransition {
    ticket: TransitionTicket,
    context: TransitionContext,
    handler: Option<Arc<dyn TransitionHandler>>,
}

impl PreparedTransition {
    pub fn ticket(&self) -> &TransitionTicket {
        &self.ticket
    }

    pub fn context(&self) -> &TransitionContext {
        &self.context
    }

    /// Run the user behavior. Edges with no behavior succeed immediately.
    pub async fn invoke(self) -> Result<(), TransitionFailure> {
        match self.handler {
            Some(handler) => handler.on_transition(&self.context).await,
            None => Ok(()),
        }
    }
}

/// What happened when a behavior's outcome was handed back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    /// The partition moved to `state`
    Applied { state: String },
    /// The behavior failed; the partition stayed in `state`
    Failed { state: String, detail: String },
    /// The ticket was fenced off; nothing changed
    Discarded { current_state: String },
}

struct ModelState {
    current: String,
    /// Bumped when a transition starts, is fenced, or the model is reset
    generation: u64,
    /// Bumped whenever `current` changes
    version: u64,
    in_flight: Option<u64>,
    history: PartitionHistory,
}

/// The finite-state machine for one partition.
///
/// An instance validates every message against its definition and applies
/// at most one transition at a time. Every started transition is issued a
/// generation token; a completion presenting an outdated token is discarded,
/// so a behavior that outlives its deadline can never move the partition.
///
/// # Example
///
/// ```rust
/// use participant_engine::core::{PartitionKey, StateModelDefinition};
/// use participant_engine::message::TransitionMessage;
/// use participant_engine::model::{StateModel, TransitionHandlers};
/// use std::sync::Arc;
///
/// let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// rt.block_on(async {
///     let model = StateModel::new(
///         PartitionKey::new("TestDB", "TestDB_0"),
///         Arc::new(StateModelDefinition::master_slave()),
///         TransitionHandlers::new(),
///     );
///     assert_eq!(model.current_state(), "OFFLINE");
///
///     let msg = TransitionMessage::new("TestDB", "TestDB_0", "OFFLINE", "SLAVE", "MasterSlave");
///     let result = model.handle_transition(msg).await;
///     assert!(result.success);
///     assert_eq!(model.current_state(), "SLAVE");
/// });
/// ```
pub struct StateModel {
    partition: PartitionKey,
    definition: Arc<StateModelDefinition>,
    handlers: TransitionHandlers,
    inner: Mutex<ModelState>,
}

impl StateModel {
    /// Create an instance in the definition's initial state.
    pub fn new(
        partition: PartitionKey,
        definition: Arc<StateModelDefinition>,
        handlers: TransitionHandlers,
    ) -> Self {
        Self::with_history_limit(partition, definition, handlers, DEFAULT_HISTORY_LIMIT)
    }

    pub fn with_history_limit(
        partition: PartitionKey,
        definition: Arc<StateModelDefinition>,
        handlers: TransitionHandlers,
        history_limit: usize,
    ) -> Self {
        let current = definition.initial_state().to_string();
        Self {
            partition,
            definition,
            handlers,
            inner: Mutex::new(ModelState {
                current,
                generation: 0,
                version: 0,
                in_flight: None,
                history: PartitionHistory::with_limit(history_limit),
            }),
        }
    }

    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    pub fn definition(&self) -> &StateModelDefinition {
        &self.definition
    }

    pub fn current_state(&self) -> String {
        self.inner.lock().current.clone()
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Number of state changes applied, including resets.
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Current state and version, read under one lock.
    pub fn observe(&self) -> (String, u64) {
        let inner = self.inner.lock();
        (inner.current.clone(), inner.version)
    }

    pub fn is_dropped(&self) -> bool {
        self.definition.is_dropped(&self.inner.lock().current)
    }

    /// Whether a started transition has not been completed or fenced yet.
    pub fn is_in_flight(&self) -> bool {
        self.inner.lock().in_flight.is_some()
    }

    pub fn history(&self) -> PartitionHistory {
        self.inner.lock().history.clone()
    }

    /// Validate a message and issue a ticket for it.
    ///
    /// Checks run in order: the from-state must equal the current state
    /// (`STALE_STATE` otherwise), then the edge must be legal
    /// (`ILLEGAL_TRANSITION` otherwise). A refused message changes nothing.
    /// Starting a transition fences any earlier ticket still outstanding.
    pub fn begin(&self, message: Arc<TransitionMessage>) -> Result<PreparedTransition, Rejection> {
        let mut inner = self.inner.lock();

        if message.from_state != inner.current {
            return Err(Rejection {
                kind: ErrorKind::StaleState,
                detail: format!(
                    "partition {} is in state {}, message expects {}",
                    self.partition, inner.current, message.from_state
                ),
                current_state: inner.current.clone(),
                version: inner.version,
            });
        }

        if !self.definition.allows(&message.from_state, &message.to_state) {
            return Err(Rejection {
                kind: ErrorKind::IllegalTransition,
                detail: format!(
                    "{} does not allow {} -> {}",
                    self.definition.name(),
                    message.from_state,
                    message.to_state
                ),
                current_state: inner.current.clone(),
                version: inner.version,
            });
        }

        inner.generation += 1;
        let token = inner.generation;
        inner.in_flight = Some(token);
        drop(inner);

        let edge = Edge::new(&message.from_state, &message.to_state);
        let ticket = TransitionTicket {
            token,
            edge: edge.clone(),
            message_id: message.id.clone(),
        };
        debug!(
            partition = %self.partition,
            edge = %edge,
            token,
            message_id = %message.id,
            "Transition started"
        );

        Ok(PreparedTransition {
            handler: self.handlers.handler_for(&edge),
            context: TransitionContext {
                partition: self.partition.clone(),
                edge,
                message,
                token,
                started_at: Utc::now(),
            },
            ticket,
        })
    }

    /// Hand back the outcome of a behavior started by [`begin`](Self::begin).
    ///
    /// Applied only if the ticket still holds the current generation and has
    /// not been completed before. A failed behavior never advances the state.
    pub fn complete(
        &self,
        ticket: &TransitionTicket,
        outcome: Result<(), TransitionFailure>,
    ) -> Completion {
        let mut inner = self.inner.lock();

        // in_flight holds the current generation while the ticket is live
        if inner.in_flight != Some(ticket.token) {
            warn!(
                partition = %self.partition,
                token = ticket.token,
                generation = inner.generation,
                message_id = %ticket.message_id,
                "Discarding completion with stale generation token"
            );
            return Completion::Discarded {
                current_state: inner.current.clone(),
            };
        }
        inner.in_flight = None;

        match outcome {
            Ok(()) => {
                inner.current = ticket.edge.to.clone();
                inner.version += 1;
                inner.history.record(StateTransition {
                    from: ticket.edge.from.clone(),
                    to: ticket.edge.to.clone(),
                    message_id: Some(ticket.message_id.clone()),
                    kind: ChangeKind::Transition,
                    timestamp: Utc::now(),
                });
                info!(
                    partition = %self.partition,
                    edge = %ticket.edge,
                    message_id = %ticket.message_id,
                    "Transition applied"
                );
                Completion::Applied {
                    state: inner.current.clone(),
                }
            }
            Err(failure) => {
                warn!(
                    partition = %self.partition,
                    edge = %ticket.edge,
                    message_id = %ticket.message_id,
                    error = %failure,
                    "Transition behavior failed"
                );
                Completion::Failed {
                    state: inner.current.clone(),
                    detail: failure.detail,
                }
            }
        }
    }

    /// Fence off an outstanding ticket so its completion will be discarded.
    ///
    /// Returns false if the ticket was already completed or superseded.
    pub fn fence(&self, ticket: &TransitionTicket) -> bool {
        let mut inner = self.inner.lock();
        if inner.in_flight != Some(ticket.token) {
            return false;
        }
        inner.generation += 1;
        inner.in_flight = None;
        true
    }

    /// Force the partition back to the initial state.
    ///
    /// Bypasses the transition table and fences any outstanding ticket.
    /// Returns the state the partition was in.
    pub fn reset(&self) -> String {
        let mut inner = self.inner.lock();
        let initial = self.definition.initial_state().to_string();
        let previous = std::mem::replace(&mut inner.current, initial.clone());

        inner.generation += 1;
        inner.version += 1;
        inner.in_flight = None;
        inner.history.record(StateTransition {
            from: previous.clone(),
            to: initial,
            message_id: None,
            kind: ChangeKind::Reset,
            timestamp: Utc::now(),
        });

        info!(partition = %self.partition, from = %previous, "State model reset");
        previous
    }

    /// Validate, run and apply one message without any deadline.
    pub async fn handle_transition(&self, message: TransitionMessage) -> TransitionResult {
        let message = Arc::new(message);
        let prepared = match self.begin(Arc::clone(&message)) {
            Ok(prepared) => prepared,
            Err(rejection) => {
                return TransitionResult::failure(
                    &message.id,
                    rejection.current_state,
                    rejection.kind,
                    rejection.detail,
                )
            }
        };

        let ticket = prepared.ticket().clone();
        let outcome = prepared.invoke().await;
        completion_to_result(&message.id, self.complete(&ticket, outcome))
    }
}

/// Map a completion to the result reported for `message_id`.
pub(crate) fn completion_to_result(message_id: &str, completion: Completion) -> TransitionResult {
    match completion {
        Completion::Applied { state } => TransitionResult::success(message_id, state),
        Completion::Failed { state, detail } => TransitionResult::failure(
            message_id,
            state,
            ErrorKind::UserTransitionFailure,
            detail,
        ),
        Completion::Discarded { current_state } => TransitionResult::failure(
            message_id,
            current_state,
            ErrorKind::ConflictingTransition,
            "superseded by an administrative reset",
        ),
    }
}

impl std::fmt::Debug for StateModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StateModel")
            .field("partition", &self.partition)
            .field("definition", &self.definition.name())
            .field("current", &inner.current)
            .field("generation", &inner.generation)
            .field("version", &inner.version)
            .finish()
    }
}
