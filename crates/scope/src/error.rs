use thiserror::Error;

use projector_core::ScopeId;

/// Failure to resolve a connection from a scope.
///
/// Resolving a type nobody registered is a caller configuration error; it is
/// propagated, never swallowed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no connection of type {connection_type} registered (scope {scope_id})")]
    NotRegistered {
        connection_type: &'static str,
        scope_id: ScopeId,
    },

    #[error("container returned an instance that is not a {expected}")]
    TypeMismatch { expected: &'static str },

    #[error("scope {0} has already ended")]
    ScopeEnded(ScopeId),
}

/// Failure opening or closing a scope.
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("failed to begin scope: {0}")]
    Begin(String),

    #[error("disposal callback for {connection_type} failed: {source}")]
    DisposalCallback {
        connection_type: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
