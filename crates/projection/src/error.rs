use thiserror::Error;

use projector_scope::ResolveError;

/// Failure raised by a projection while handling a message or fetching its cursor.
#[derive(Debug, Error)]
pub enum HandleError {
    /// The projection's connection could not be resolved from the batch scope.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Application handler code failed.
    #[error("handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    /// The projection's own cursor bootstrap failed.
    #[error("cursor fetch failed: {0}")]
    CursorFetch(#[source] anyhow::Error),
}
