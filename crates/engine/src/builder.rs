use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use projector_core::{ConfigError, ProjectionKey};
use projector_projection::Projection;
use projector_scope::{Container, LifetimeScopeFactory, ScopeFactory};

use crate::projector::Projector;
use crate::repository::SequenceCursorRepository;

/// Collects projections and collaborators, then validates them into a [`Projector`].
///
/// ```ignore
/// let projector = ProjectorBuilder::new()
///     .register(orders)
///     .register(customers)
///     .set_connection_resolver(registry)
///     .set_repository(InMemoryCursorRepository::new())
///     .build()?;
/// ```
///
/// Validation happens in `build()`; a builder that fails validation never
/// produces an engine.
pub struct ProjectorBuilder<K>
where
    K: ProjectionKey,
{
    projections: Vec<Arc<dyn Projection<K>>>,
    scope_factory: Option<Arc<dyn ScopeFactory>>,
    repository: Option<Arc<dyn SequenceCursorRepository<K>>>,
}

impl<K> Default for ProjectorBuilder<K>
where
    K: ProjectionKey,
{
    fn default() -> Self {
        Self {
            projections: Vec::new(),
            scope_factory: None,
            repository: None,
        }
    }
}

impl<K> ProjectorBuilder<K>
where
    K: ProjectionKey,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P>(self, projection: P) -> Self
    where
        P: Projection<K> + 'static,
    {
        self.register_shared(Arc::new(projection))
    }

    pub fn register_shared(mut self, projection: Arc<dyn Projection<K>>) -> Self {
        self.projections.push(projection);
        self
    }

    pub fn register_all<I, P>(self, projections: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Projection<K> + 'static,
    {
        projections.into_iter().fold(self, |builder, p| builder.register(p))
    }

    pub fn set_scope_factory<F>(mut self, factory: F) -> Self
    where
        F: ScopeFactory + 'static,
    {
        self.scope_factory = Some(Arc::new(factory));
        self
    }

    /// Use `container` as the parent of every batch scope.
    ///
    /// Shorthand for `set_scope_factory(LifetimeScopeFactory::new(container))`.
    pub fn set_connection_resolver<C>(self, container: C) -> Self
    where
        C: Container + 'static,
    {
        self.set_scope_factory(LifetimeScopeFactory::new(container))
    }

    pub fn set_repository<R>(mut self, repository: R) -> Self
    where
        R: SequenceCursorRepository<K> + 'static,
    {
        self.repository = Some(Arc::new(repository));
        self
    }

    pub fn build(self) -> Result<Projector<K>, ConfigError> {
        if self.projections.is_empty() {
            return Err(ConfigError::NoProjections);
        }
        let scope_factory = self.scope_factory.ok_or(ConfigError::MissingScopeFactory)?;
        let repository = self.repository.ok_or(ConfigError::MissingRepository)?;

        let mut seen = HashSet::with_capacity(self.projections.len());
        for projection in &self.projections {
            if !seen.insert(projection.key()) {
                return Err(ConfigError::DuplicateProjectionKey(format!("{:?}", projection.key())));
            }
        }

        if let Some(err) = self
            .projections
            .iter()
            .flat_map(|p| p.configuration_errors())
            .next()
        {
            return Err(err);
        }

        debug!(projections = self.projections.len(), "projector built");
        Ok(Projector::new(self.projections, scope_factory, repository))
    }
}

impl<K> core::fmt::Debug for ProjectorBuilder<K>
where
    K: ProjectionKey,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let keys: Vec<&K> = self.projections.iter().map(|p| p.key()).collect();
        f.debug_struct("ProjectorBuilder")
            .field("projections", &keys)
            .field("scope_factory", &self.scope_factory.is_some())
            .field("repository", &self.repository.is_some())
            .finish()
    }
}
