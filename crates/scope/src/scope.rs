use std::any::Any;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, warn};

use projector_core::ScopeId;

use crate::connection::{instance_address, Connection, ConnectionType};
use crate::container::{Container, ResourceScope};
use crate::disposal::DisposalCallbacks;
use crate::error::{ResolveError, ScopeError};
use crate::observer::{ConnectionResolved, ScopeEnding, ScopeObserver};

/// Resource-resolution context bounded to one dispatch batch.
///
/// A scope:
/// - resolves connections from its underlying [`ResourceScope`]
/// - remembers every distinct `(type, instance)` it handed out
/// - notifies its observers on each resolution and once when it ends
/// - runs [`DisposalCallbacks`] for remembered instances in [`Scope::close`]
///
/// Ending is idempotent. A scope dropped without `close()` still emits its
/// ending notification and disposes the underlying scope, but skips the
/// (async) disposal callbacks.
pub struct Scope {
    id: ScopeId,
    inner: Box<dyn ResourceScope>,
    observers: Vec<Arc<dyn ScopeObserver>>,
    disposal_callbacks: Option<Arc<DisposalCallbacks>>,
    resolved: Mutex<Vec<(ConnectionType, Connection)>>,
    ended: bool,
}

impl Scope {
    pub fn new(inner: Box<dyn ResourceScope>) -> Self {
        Self {
            id: ScopeId::new(),
            inner,
            observers: Vec::new(),
            disposal_callbacks: None,
            resolved: Mutex::new(Vec::new()),
            ended: false,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ScopeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_disposal_callbacks(mut self, callbacks: Arc<DisposalCallbacks>) -> Self {
        self.disposal_callbacks = Some(callbacks);
        self
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Resolve a connection by its runtime type.
    pub fn resolve_connection(&self, connection_type: ConnectionType) -> Result<Connection, ResolveError> {
        if self.ended {
            return Err(ResolveError::ScopeEnded(self.id));
        }

        let connection = self.inner.resolve(connection_type).ok_or(ResolveError::NotRegistered {
            connection_type: connection_type.name(),
            scope_id: self.id,
        })?;

        self.remember(connection_type, &connection);

        let event = ConnectionResolved {
            scope_id: self.id,
            connection_type,
            connection: Arc::clone(&connection),
            occurred_at: Utc::now(),
        };
        for observer in &self.observers {
            observer.on_resolved(&event);
        }

        Ok(connection)
    }

    /// Resolve a connection of type `T`.
    pub fn resolve<T>(&self) -> Result<Arc<T>, ResolveError>
    where
        T: Any + Send + Sync,
    {
        self.resolve_connection(ConnectionType::of::<T>())?
            .downcast::<T>()
            .map_err(|_| ResolveError::TypeMismatch {
                expected: std::any::type_name::<T>(),
            })
    }

    /// Number of distinct `(type, instance)` pairs resolved so far.
    pub fn resolved_count(&self) -> usize {
        self.resolved.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Run disposal callbacks, then end the scope.
    ///
    /// The scope ends even when a callback fails; the first failure is returned.
    pub async fn close(mut self) -> Result<(), ScopeError> {
        let resolved = match self.resolved.lock() {
            Ok(mut r) => std::mem::take(&mut *r),
            Err(_) => Vec::new(),
        };
        let resolved_connections = resolved.len();

        let mut first_failure = None;
        if let Some(callbacks) = self.disposal_callbacks.clone() {
            for (connection_type, connection) in resolved {
                if let Err(source) = callbacks.run(connection_type, connection).await {
                    warn!(scope_id = %self.id, connection_type = connection_type.name(), error = %source, "disposal callback failed");
                    if first_failure.is_none() {
                        first_failure = Some(ScopeError::DisposalCallback {
                            connection_type: connection_type.name(),
                            source,
                        });
                    }
                }
            }
        }

        self.end(resolved_connections);

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn remember(&self, connection_type: ConnectionType, connection: &Connection) {
        let Ok(mut resolved) = self.resolved.lock() else {
            return;
        };
        let address = instance_address(connection);
        let known = resolved
            .iter()
            .any(|(t, c)| *t == connection_type && instance_address(c) == address);
        if !known {
            resolved.push((connection_type, Arc::clone(connection)));
        }
    }

    fn end(&mut self, resolved_connections: usize) {
        if self.ended {
            return;
        }
        self.ended = true;

        let event = ScopeEnding {
            scope_id: self.id,
            resolved_connections,
            occurred_at: Utc::now(),
        };
        for observer in &self.observers {
            observer.on_scope_ending(&event);
        }

        self.inner.dispose();
        debug!(scope_id = %self.id, resolved_connections, "scope ended");
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        let resolved_connections = self.resolved_count();
        self.end(resolved_connections);
    }
}

impl core::fmt::Debug for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("observers", &self.observers.len())
            .field("resolved", &self.resolved_count())
            .field("ended", &self.ended)
            .finish()
    }
}

/// Opens one [`Scope`] per dispatch batch.
pub trait ScopeFactory: Send + Sync {
    fn begin_scope(&self) -> Result<Scope, ScopeError>;
}

impl<F> ScopeFactory for Arc<F>
where
    F: ScopeFactory + ?Sized,
{
    fn begin_scope(&self) -> Result<Scope, ScopeError> {
        (**self).begin_scope()
    }
}

/// Scope factory backed by a parent [`Container`].
///
/// Every child scope it opens carries the factory's observers, so one observer
/// registered here sees the resolutions and endings of all scopes opened on the
/// container's behalf.
pub struct LifetimeScopeFactory<C> {
    container: C,
    observers: Vec<Arc<dyn ScopeObserver>>,
    disposal_callbacks: Option<Arc<DisposalCallbacks>>,
}

impl<C> LifetimeScopeFactory<C>
where
    C: Container,
{
    pub fn new(container: C) -> Self {
        Self {
            container,
            observers: Vec::new(),
            disposal_callbacks: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ScopeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_disposal_callbacks(mut self, callbacks: DisposalCallbacks) -> Self {
        self.disposal_callbacks = Some(Arc::new(callbacks));
        self
    }

    pub fn container(&self) -> &C {
        &self.container
    }
}

impl<C> ScopeFactory for LifetimeScopeFactory<C>
where
    C: Container,
{
    fn begin_scope(&self) -> Result<Scope, ScopeError> {
        let mut scope = Scope::new(self.container.begin_child()?);
        for observer in &self.observers {
            scope = scope.with_observer(Arc::clone(observer));
        }
        if let Some(callbacks) = &self.disposal_callbacks {
            scope = scope.with_disposal_callbacks(Arc::clone(callbacks));
        }
        debug!(scope_id = %scope.id(), "scope opened");
        Ok(scope)
    }
}
