use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use projector_core::ProjectionKey;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("cursor backend error: {0}")]
    Backend(String),

    #[error("corrupt cursor for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("cursor repository lock poisoned")]
    Poisoned,
}

/// Durable key → next-sequence-number store (checkpoints).
///
/// The engine calls `fetch` once when it first needs cursors and `store` once
/// after every dispatched batch, whether or not the batch succeeded. Keys absent
/// from the returned map are uninitialised.
#[async_trait]
pub trait SequenceCursorRepository<K>: Send + Sync
where
    K: ProjectionKey,
{
    async fn fetch(&self, keys: &HashSet<K>) -> Result<HashMap<K, u64>, RepositoryError>;

    async fn store(&self, cursors: &HashMap<K, u64>) -> Result<(), RepositoryError>;
}

#[async_trait]
impl<K, R> SequenceCursorRepository<K> for Arc<R>
where
    K: ProjectionKey,
    R: SequenceCursorRepository<K> + ?Sized,
{
    async fn fetch(&self, keys: &HashSet<K>) -> Result<HashMap<K, u64>, RepositoryError> {
        (**self).fetch(keys).await
    }

    async fn store(&self, cursors: &HashMap<K, u64>) -> Result<(), RepositoryError> {
        (**self).store(cursors).await
    }
}
