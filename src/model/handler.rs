//! User-supplied transition behavior.

use crate::core::{Edge, PartitionKey};
use crate::error::TransitionFailure;
use crate::message::TransitionMessage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Context handed to a transition behavior.
#[derive(Clone, Debug)]
pub struct TransitionContext {
    pub partition: PartitionKey,
    pub edge: Edge,
    pub message: Arc<TransitionMessage>,
    /// Generation token this invocation runs under
    pub token: u64,
    pub started_at: DateTime<Utc>,
}

impl TransitionContext {
    /// Elapsed time since the transition started.
    pub fn elapsed(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Behavior run when a partition moves along one edge.
///
/// This is where a participant does real work: opening a store, catching up
/// a replica, promoting a leader. It may block or perform I/O. Returning an
/// error leaves the partition in its from-state.
///
/// Closures of the form `Fn(TransitionContext) -> impl Future<Output =
/// Result<(), TransitionFailure>>` implement this trait.
#[async_trait]
pub trait TransitionHandler: Send + Sync {
    async fn on_transition(&self, ctx: &TransitionContext) -> Result<(), TransitionFailure>;
}

#[async_trait]
impl<F, Fut> TransitionHandler for F
where
    F: Fn(TransitionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TransitionFailure>> + Send + 'static,
{
    async fn on_transition(&self, ctx: &TransitionContext) -> Result<(), TransitionFailure> {
        (self)(ctx.clone()).await
    }
}

/// Table of behaviors for one partition's state model, keyed by edge.
///
/// Edges without a registered behavior use the fallback if one is set, and
/// otherwise succeed without doing anything.
///
/// # Example
///
/// ```rust
/// use participant_engine::model::{TransitionContext, TransitionHandlers};
/// use participant_engine::error::TransitionFailure;
///
/// let handlers = TransitionHandlers::new()
///     .on("OFFLINE", "SLAVE", |_ctx: TransitionContext| async {
///         Ok::<(), TransitionFailure>(())
///     })
///     .on("SLAVE", "MASTER", |_ctx: TransitionContext| async {
///         Err::<(), _>(TransitionFailure::new("not caught up"))
///     });
///
/// assert_eq!(handlers.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct TransitionHandlers {
    edges: HashMap<Edge, Arc<dyn TransitionHandler>>,
    fallback: Option<Arc<dyn TransitionHandler>>,
}

impl TransitionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the behavior for `from -> to`, replacing any previous one.
    pub fn on<H>(mut self, from: impl Into<String>, to: impl Into<String>, handler: H) -> Self
    where
        H: TransitionHandler + 'static,
    {
        self.edges.insert(Edge::new(from, to), Arc::new(handler));
        self
    }

    /// Register a shared behavior for `from -> to`.
    pub fn on_shared(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        handler: Arc<dyn TransitionHandler>,
    ) -> Self {
        self.edges.insert(Edge::new(from, to), handler);
        self
    }

    /// Behavior for edges without their own entry.
    pub fn fallback<H>(mut self, handler: H) -> Self
    where
        H: TransitionHandler + 'static,
    {
        self.fallback = Some(Arc::new(handler));
        self
    }

    pub fn handler_for(&self, edge: &Edge) -> Option<Arc<dyn TransitionHandler>> {
        self.edges
            .get(edge)
            .or(self.fallback.as_ref())
            .map(Arc::clone)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.fallback.is_none()
    }
}

impl std::fmt::Debug for TransitionHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionHandlers")
            .field("edges", &self.edges.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder;

    #[async_trait]
    impl TransitionHandler for Recorder {
        async fn on_transition(&self, ctx: &TransitionContext) -> Result<(), TransitionFailure> {
            if ctx.edge.to == "MASTER" {
                Err(TransitionFailure::new("refusing promotion"))
            } else {
                Ok(())
            }
        }
    }

    fn context(from: &str, to: &str) -> TransitionContext {
        let message = TransitionMessage::new("R", "R_0", from, to, "MasterSlave");
        TransitionContext {
            partition: message.partition_key(),
            edge: Edge::new(from, to),
            message: Arc::new(message),
            token: 1,
            started_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn closure_handlers_run() {
        let handlers = TransitionHandlers::new()
            .on("OFFLINE", "SLAVE", |ctx: TransitionContext| async move {
                assert_eq!(ctx.partition.partition, "R_0");
                Ok::<(), TransitionFailure>(())
            });

        let handler = handlers
            .handler_for(&Edge::new("OFFLINE", "SLAVE"))
            .unwrap();
        assert!(handler.on_transition(&context("OFFLINE", "SLAVE")).await.is_ok());
    }

    #[tokio::test]
    async fn struct_handlers_run() {
        let handlers = TransitionHandlers::new().on("SLAVE", "MASTER", Recorder);
        let handler = handlers.handler_for(&Edge::new("SLAVE", "MASTER")).unwrap();

        let err = handler
            .on_transition(&context("SLAVE", "MASTER"))
            .await
            .unwrap_err();
        assert_eq!(err.detail, "refusing promotion");
    }

    #[test]
    fn missing_edge_uses_fallback() {
        let handlers = TransitionHandlers::new();
        assert!(handlers.handler_for(&Edge::new("A", "B")).is_none());

        let handlers = handlers.fallback(Recorder);
        assert!(handlers.handler_for(&Edge::new("A", "B")).is_some());
    }

    #[test]
    fn context_elapsed_is_non_negative() {
        let ctx = context("OFFLINE", "SLAVE");
        assert!(ctx.elapsed() < Duration::from_secs(5));
    }
}
