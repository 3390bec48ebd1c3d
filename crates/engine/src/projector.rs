use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use projector_core::{MessageEnvelope, ProjectionKey};
use projector_projection::{HandleError, Projection};
use projector_scope::{Scope, ScopeFactory};

use crate::error::ProjectError;
use crate::repository::SequenceCursorRepository;

/// Result of one [`Projector::project`] call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProjectOutcome {
    /// Empty input; no scope was opened and nothing was persisted.
    Idle,
    /// Every envelope was dispatched.
    Completed { processed: usize },
    /// The cancellation token fired. `processed` counts fully dispatched envelopes;
    /// partial progress on the envelope in flight is persisted too.
    Cancelled { processed: usize },
}

impl ProjectOutcome {
    pub fn processed(&self) -> usize {
        match self {
            ProjectOutcome::Idle => 0,
            ProjectOutcome::Completed { processed } | ProjectOutcome::Cancelled { processed } => *processed,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProjectOutcome::Cancelled { .. })
    }
}

/// Cursor state owned by one projector instance.
#[derive(Debug)]
struct CursorCache<K> {
    next: HashMap<K, u64>,
    global: u64,
}

/// Ordered dispatch engine.
///
/// Built by [`crate::ProjectorBuilder`]. Every method that touches the cursor
/// cache takes `&mut self`, so concurrent batches on one instance are ruled out
/// at compile time; share a projector across tasks behind a mutex or give it to
/// a single worker.
pub struct Projector<K>
where
    K: ProjectionKey,
{
    projections: Vec<Arc<dyn Projection<K>>>,
    scope_factory: Arc<dyn ScopeFactory>,
    repository: Arc<dyn SequenceCursorRepository<K>>,
    cursors: Option<CursorCache<K>>,
}

impl<K> Projector<K>
where
    K: ProjectionKey,
{
    pub(crate) fn new(
        projections: Vec<Arc<dyn Projection<K>>>,
        scope_factory: Arc<dyn ScopeFactory>,
        repository: Arc<dyn SequenceCursorRepository<K>>,
    ) -> Self {
        Self {
            projections,
            scope_factory,
            repository,
            cursors: None,
        }
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Keys in registration order.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.projections.iter().map(|p| p.key())
    }

    /// Cached cursor for `key`. `None` until cursors were loaded.
    pub fn cursor(&self, key: &K) -> Option<u64> {
        self.cursors.as_ref()?.next.get(key).copied()
    }

    /// Sequence number the next envelope must carry, loading cursors on first use.
    ///
    /// Storage is read at most once per projector instance; later calls return
    /// the cached value.
    pub async fn next_sequence_number(&mut self) -> Result<u64, ProjectError> {
        if let Some(cache) = &self.cursors {
            return Ok(cache.global);
        }

        let scope = self.scope_factory.begin_scope()?;
        let loaded = self.load_cursors(&scope).await;
        let closed = scope.close().await;

        let cache = loaded?;
        closed?;
        let global = cache.global;
        self.cursors = Some(cache);
        Ok(global)
    }

    /// Dispatch a single envelope.
    pub async fn project_one(
        &mut self,
        envelope: &MessageEnvelope,
        cancel: &CancellationToken,
    ) -> Result<ProjectOutcome, ProjectError> {
        self.project(std::slice::from_ref(envelope), cancel).await
    }

    /// Dispatch a batch of envelopes in order.
    ///
    /// The batch shares one resolution scope. Cursors are stored after dispatch
    /// whether it succeeded or not, then the scope is closed; a dispatch error
    /// takes precedence over storage or close errors, which are logged.
    pub async fn project(
        &mut self,
        envelopes: &[MessageEnvelope],
        cancel: &CancellationToken,
    ) -> Result<ProjectOutcome, ProjectError> {
        if envelopes.is_empty() {
            return Ok(ProjectOutcome::Idle);
        }

        let scope = self.scope_factory.begin_scope()?;
        let span = info_span!("projector.project", scope_id = %scope.id(), batch_len = envelopes.len());

        async move {
            let dispatched = self.dispatch(&scope, envelopes, cancel).await;

            if let Err(err) = &dispatched {
                warn!(error = %err, "dispatch failed; persisting cursor progress");
            }
            let persisted = match &self.cursors {
                Some(cache) => self.repository.store(&cache.next).await,
                None => Ok(()),
            };
            let closed = scope.close().await;

            match dispatched {
                Ok(outcome) => {
                    persisted?;
                    closed?;
                    debug!(processed = outcome.processed(), cancelled = outcome.is_cancelled(), "batch finished");
                    Ok(outcome)
                }
                Err(err) => {
                    if let Err(store_err) = persisted {
                        warn!(error = %store_err, "failed to persist cursors after dispatch failure");
                    }
                    if let Err(close_err) = closed {
                        warn!(error = %close_err, "failed to close scope after dispatch failure");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &mut self,
        scope: &Scope,
        envelopes: &[MessageEnvelope],
        cancel: &CancellationToken,
    ) -> Result<ProjectOutcome, ProjectError> {
        let cache = match self.cursors.take() {
            Some(cache) => cache,
            None => self.load_cursors(scope).await?,
        };
        let cache = self.cursors.insert(cache);

        for (offset, envelope) in envelopes.iter().enumerate() {
            let Some(expected) = u64::try_from(offset).ok().and_then(|o| cache.global.checked_add(o)) else {
                return Err(ProjectError::SequenceExhausted {
                    found: envelope.sequence_number(),
                    message_type: envelope.message_type(),
                });
            };
            if envelope.sequence_number() != expected {
                return Err(ProjectError::SequenceMismatch {
                    expected,
                    found: envelope.sequence_number(),
                    message_type: envelope.message_type(),
                });
            }
        }

        let mut processed = 0;
        for envelope in envelopes {
            let sequence_number = envelope.sequence_number();

            let mut due: Vec<&Arc<dyn Projection<K>>> = self
                .projections
                .iter()
                .filter(|p| cache.next.get(p.key()) == Some(&sequence_number))
                .collect();
            due.sort_by_key(|p| Reverse(p.priority()));

            for projection in due {
                let key = projection.key();
                let handled = match projection.handle(scope, envelope, cancel).await {
                    Ok(handled) => handled,
                    Err(HandleError::Handler(err)) if cancel.is_cancelled() => {
                        warn!(projection = ?key, sequence_number, error = %err, "handler stopped by cancellation");
                        return Ok(ProjectOutcome::Cancelled { processed });
                    }
                    Err(err) => return Err(ProjectError::from_handle(format!("{key:?}"), envelope, err)),
                };

                let next = projection.advance(sequence_number, handled);
                if sequence_number.checked_add(1) != Some(next) {
                    return Err(ProjectError::CursorNotAdvanced {
                        projection: format!("{key:?}"),
                        sequence_number,
                        message_type: envelope.message_type(),
                    });
                }
                cache.next.insert(key.clone(), next);
                debug!(projection = ?key, sequence_number, handled, "dispatched");

                if cancel.is_cancelled() {
                    return Ok(ProjectOutcome::Cancelled { processed });
                }
            }

            cache.global += 1;
            processed += 1;
        }

        Ok(ProjectOutcome::Completed { processed })
    }

    /// Read checkpoints for every registered key; keys without one ask their
    /// projection's own cursor fetch.
    async fn load_cursors(&self, scope: &Scope) -> Result<CursorCache<K>, ProjectError> {
        let keys: HashSet<K> = self.projections.iter().map(|p| p.key().clone()).collect();
        let mut stored = self.repository.fetch(&keys).await?;

        let mut next = HashMap::with_capacity(self.projections.len());
        for projection in &self.projections {
            let key = projection.key();
            let value = match stored.remove(key) {
                Some(value) => value,
                None => projection
                    .fetch_next_sequence_number(scope)
                    .await
                    .map_err(|err| ProjectError::from_cursor_fetch(format!("{key:?}"), err))?,
            };
            if value == 0 || value == u64::MAX {
                return Err(ProjectError::InvalidCursor {
                    projection: format!("{key:?}"),
                    value,
                });
            }
            next.insert(key.clone(), value);
        }

        let global = next.values().copied().min().unwrap_or(1);
        info!(global_cursor = global, projections = next.len(), "sequence cursors loaded");
        Ok(CursorCache { next, global })
    }
}

impl<K> core::fmt::Debug for Projector<K>
where
    K: ProjectionKey,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let keys: Vec<&K> = self.keys().collect();
        f.debug_struct("Projector")
            .field("projections", &keys)
            .field("global_cursor", &self.cursors.as_ref().map(|c| c.global))
            .finish()
    }
}
