use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use projector_core::ProjectionKey;

use crate::repository::{RepositoryError, SequenceCursorRepository};

/// In-memory cursor repository.
///
/// Intended for tests/dev. Counts `fetch` and `store` calls so callers can
/// observe how often the engine touches storage.
#[derive(Debug)]
pub struct InMemoryCursorRepository<K> {
    cursors: RwLock<HashMap<K, u64>>,
    fetches: AtomicUsize,
    stores: AtomicUsize,
}

impl<K> Default for InMemoryCursorRepository<K> {
    fn default() -> Self {
        Self {
            cursors: RwLock::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
            stores: AtomicUsize::new(0),
        }
    }
}

impl<K> InMemoryCursorRepository<K>
where
    K: ProjectionKey,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the repository with existing checkpoints.
    pub fn with_cursors(cursors: impl IntoIterator<Item = (K, u64)>) -> Self {
        Self {
            cursors: RwLock::new(cursors.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Copy of every stored checkpoint.
    pub fn snapshot(&self) -> HashMap<K, u64> {
        self.cursors.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn get(&self, key: &K) -> Option<u64> {
        self.cursors.read().ok()?.get(key).copied()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn store_count(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<K> SequenceCursorRepository<K> for InMemoryCursorRepository<K>
where
    K: ProjectionKey,
{
    async fn fetch(&self, keys: &HashSet<K>) -> Result<HashMap<K, u64>, RepositoryError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let cursors = self.cursors.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(cursors
            .iter()
            .filter(|(key, _)| keys.contains(*key))
            .map(|(key, value)| (key.clone(), *value))
            .collect())
    }

    async fn store(&self, cursors: &HashMap<K, u64>) -> Result<(), RepositoryError> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.cursors.write().map_err(|_| RepositoryError::Poisoned)?;
        stored.extend(cursors.iter().map(|(key, value)| (key.clone(), *value)));
        Ok(())
    }
}
