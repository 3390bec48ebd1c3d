//! Scope lifecycle notifications.
//!
//! Observers are registered explicitly and notified synchronously, in
//! registration order, from the thread that resolved or closed the scope.

use chrono::{DateTime, Utc};

use projector_core::ScopeId;

use crate::connection::{Connection, ConnectionType};

/// A connection was resolved from a scope.
#[derive(Clone)]
pub struct ConnectionResolved {
    pub scope_id: ScopeId,
    pub connection_type: ConnectionType,
    pub connection: Connection,
    pub occurred_at: DateTime<Utc>,
}

impl core::fmt::Debug for ConnectionResolved {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionResolved")
            .field("scope_id", &self.scope_id)
            .field("connection_type", &self.connection_type.name())
            .field("occurred_at", &self.occurred_at)
            .finish_non_exhaustive()
    }
}

/// A scope is about to release its resources. Emitted exactly once per scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeEnding {
    pub scope_id: ScopeId,
    /// Number of distinct `(type, instance)` pairs resolved during the scope.
    pub resolved_connections: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Lifecycle event, as delivered through [`crate::LifecycleBus`].
#[derive(Debug, Clone)]
pub enum ScopeEvent {
    Resolved(ConnectionResolved),
    Ending(ScopeEnding),
}

impl ScopeEvent {
    pub fn scope_id(&self) -> ScopeId {
        match self {
            ScopeEvent::Resolved(e) => e.scope_id,
            ScopeEvent::Ending(e) => e.scope_id,
        }
    }
}

/// Receives scope lifecycle notifications.
///
/// Both methods default to no-ops so observers only implement what they need.
pub trait ScopeObserver: Send + Sync {
    fn on_resolved(&self, _event: &ConnectionResolved) {}

    fn on_scope_ending(&self, _event: &ScopeEnding) {}
}

impl<O> ScopeObserver for std::sync::Arc<O>
where
    O: ScopeObserver + ?Sized,
{
    fn on_resolved(&self, event: &ConnectionResolved) {
        (**self).on_resolved(event)
    }

    fn on_scope_ending(&self, event: &ScopeEnding) {
        (**self).on_scope_ending(event)
    }
}
