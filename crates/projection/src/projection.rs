use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use projector_core::{ConfigError, MessageEnvelope, Priority, ProjectionKey};
use projector_scope::{ConnectionType, Scope};

use crate::error::HandleError;

/// An independently-checkpointed consumer of the message stream.
///
/// The dispatch engine drives projections exclusively through this trait, so it
/// never needs to know concrete connection or payload types.
///
/// ## Cursor Protocol
///
/// Every projection has a cursor: the next sequence number it expects. The
/// engine owns the cached cursor value and asks the projection only for:
///
/// - **Bootstrap**: [`Projection::fetch_next_sequence_number`] when storage has no
///   checkpoint for this key (defaults to 1)
/// - **Advance**: [`Projection::advance`] after each message routed to it
///
/// `advance` must return `current + 1`. Anything else is a protocol violation
/// and fails the batch with an error naming the projection and message.
///
/// ## Handling
///
/// `handle` returns `Ok(false)` when no handler is registered for the payload
/// type. That is not an error: the cursor still advances. Handler failures are
/// returned as [`HandleError::Handler`] and are not retried.
///
/// ## Cancellation
///
/// Handlers receive the batch's cancellation token and are expected to observe
/// it at their own suspension points. The engine checks it after each handler
/// returns.
#[async_trait]
pub trait Projection<K>: Send + Sync
where
    K: ProjectionKey,
{
    /// Unique key among all projections registered with one engine.
    fn key(&self) -> &K;

    fn priority(&self) -> Priority {
        Priority::Normal
    }

    /// Connection type this projection's handlers resolve from the batch scope.
    fn connection_type(&self) -> ConnectionType;

    /// Wiring problems detected while the projection was assembled.
    ///
    /// Reported by the engine builder; a non-empty list prevents the engine from
    /// being built.
    fn configuration_errors(&self) -> Vec<ConfigError> {
        Vec::new()
    }

    /// Cursor to start from when storage holds no checkpoint for this key.
    async fn fetch_next_sequence_number(&self, _scope: &Scope) -> Result<u64, HandleError> {
        Ok(1)
    }

    /// Dispatch one envelope. Returns whether a payload-specific handler ran.
    async fn handle(
        &self,
        scope: &Scope,
        envelope: &MessageEnvelope,
        cancel: &CancellationToken,
    ) -> Result<bool, HandleError>;

    /// Next cursor value after a message was routed to this projection.
    ///
    /// Saturates at `u64::MAX`; the engine rejects a cursor that did not move.
    fn advance(&self, current: u64, _handled: bool) -> u64 {
        current.saturating_add(1)
    }
}

#[async_trait]
impl<K, P> Projection<K> for Arc<P>
where
    K: ProjectionKey,
    P: Projection<K> + ?Sized,
{
    fn key(&self) -> &K {
        (**self).key()
    }

    fn priority(&self) -> Priority {
        (**self).priority()
    }

    fn connection_type(&self) -> ConnectionType {
        (**self).connection_type()
    }

    fn configuration_errors(&self) -> Vec<ConfigError> {
        (**self).configuration_errors()
    }

    async fn fetch_next_sequence_number(&self, scope: &Scope) -> Result<u64, HandleError> {
        (**self).fetch_next_sequence_number(scope).await
    }

    async fn handle(
        &self,
        scope: &Scope,
        envelope: &MessageEnvelope,
        cancel: &CancellationToken,
    ) -> Result<bool, HandleError> {
        (**self).handle(scope, envelope, cancel).await
    }

    fn advance(&self, current: u64, handled: bool) -> u64 {
        (**self).advance(current, handled)
    }
}
