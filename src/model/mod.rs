//! Per-partition state machines and the behavior they run.
//!
//! - **Handlers**: user-supplied async behavior, one per edge
//! - **StateModel**: validates messages against a definition, issues
//!   generation tokens, and applies or discards behavior outcomes

mod handler;
mod instance;

pub use handler::{TransitionContext, TransitionHandler, TransitionHandlers};
pub use instance::{Completion, PreparedTransition, Rejection, StateModel, TransitionTicket};

pub(crate) use instance::completion_to_result;
