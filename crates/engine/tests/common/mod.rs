#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use projector_core::{MessageEnvelope, Priority};
use projector_engine::{
    InMemoryCursorRepository, Projector, ProjectorBuilder, RepositoryError, SequenceCursorRepository,
};
use projector_projection::{HandleError, Projection, TypedProjection};
use projector_scope::{ConnectionType, LifetimeScopeFactory, Scope, ServiceRegistry};

pub type Key = &'static str;

/// Connection shared by every test projection: records `key:sequence` per handled message.
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn record(&self, key: &str, sequence_number: u64) {
        self.entries.lock().unwrap().push(format!("{key}:{sequence_number}"));
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }
}

/// Scoped connection; one instance per batch.
#[derive(Debug, Default)]
pub struct Tx;

#[derive(Debug)]
pub struct Created;

#[derive(Debug)]
pub struct Ignored;

pub fn created(sequence_number: u64) -> MessageEnvelope {
    MessageEnvelope::new(sequence_number, Created).unwrap()
}

pub fn batch(range: std::ops::RangeInclusive<u64>) -> Vec<MessageEnvelope> {
    range.map(created).collect()
}

pub fn registry(journal: &Arc<Journal>) -> ServiceRegistry {
    ServiceRegistry::new()
        .register_singleton(Arc::clone(journal))
        .register_scoped(Tx::default)
}

pub fn recording(key: Key, priority: Priority) -> TypedProjection<Key, Journal> {
    TypedProjection::<Key, Journal>::new(key)
        .with_priority(priority)
        .when::<Created, _, _>(move |journal, env, _msg| async move {
            journal.record(key, env.sequence_number());
            Ok(())
        })
}

pub fn failing(key: Key) -> TypedProjection<Key, Journal> {
    TypedProjection::<Key, Journal>::new(key).when::<Created, _, _>(|_journal, env, _msg| async move {
        Err(anyhow::anyhow!("read model rejected message {}", env.sequence_number()))
    })
}

/// Projection with a broken cursor increment.
pub struct Stuck;

#[async_trait]
impl Projection<Key> for Stuck {
    fn key(&self) -> &Key {
        &"stuck"
    }

    fn connection_type(&self) -> ConnectionType {
        ConnectionType::of::<Journal>()
    }

    async fn handle(
        &self,
        _scope: &Scope,
        _envelope: &MessageEnvelope,
        _cancel: &CancellationToken,
    ) -> Result<bool, HandleError> {
        Ok(false)
    }

    fn advance(&self, current: u64, _handled: bool) -> u64 {
        current
    }
}

pub fn builder(journal: &Arc<Journal>, repository: &Arc<InMemoryCursorRepository<Key>>) -> ProjectorBuilder<Key> {
    ProjectorBuilder::new()
        .set_scope_factory(LifetimeScopeFactory::new(registry(journal)))
        .set_repository(Arc::clone(repository))
}

pub fn projector<P>(
    journal: &Arc<Journal>,
    repository: &Arc<InMemoryCursorRepository<Key>>,
    projections: Vec<P>,
) -> Projector<Key>
where
    P: Projection<Key> + 'static,
{
    builder(journal, repository).register_all(projections).build().unwrap()
}

/// Cursor store whose writes always fail; reads come from `inner`.
#[derive(Debug, Default)]
pub struct ReadOnlyStore {
    pub inner: InMemoryCursorRepository<Key>,
}

#[async_trait]
impl SequenceCursorRepository<Key> for ReadOnlyStore {
    async fn fetch(&self, keys: &HashSet<Key>) -> Result<HashMap<Key, u64>, RepositoryError> {
        self.inner.fetch(keys).await
    }

    async fn store(&self, _cursors: &HashMap<Key, u64>) -> Result<(), RepositoryError> {
        Err(RepositoryError::Backend("read-only".to_string()))
    }
}
