//! Container seam and the in-memory service registry.
//!
//! A [`Container`] is the parent resolution context (a DI container, a pool
//! holder, ...). Each dispatch batch asks it for a child [`ResourceScope`] whose
//! instances live exactly as long as the batch.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::connection::{Connection, ConnectionType};
use crate::error::ScopeError;

/// Raw child scope handed out by a [`Container`].
///
/// Implementations return `None` for types they cannot provide.
pub trait ResourceScope: Send + Sync {
    fn resolve(&self, connection_type: ConnectionType) -> Option<Connection>;

    /// Release every instance owned by this scope.
    ///
    /// Called at most once by [`crate::Scope`].
    fn dispose(&mut self) {}
}

/// Parent container able to open child scopes.
pub trait Container: Send + Sync {
    fn begin_child(&self) -> Result<Box<dyn ResourceScope>, ScopeError>;
}

impl<C> Container for Arc<C>
where
    C: Container + ?Sized,
{
    fn begin_child(&self) -> Result<Box<dyn ResourceScope>, ScopeError> {
        (**self).begin_child()
    }
}

type Factory = Arc<dyn Fn() -> Connection + Send + Sync>;

#[derive(Clone)]
enum Registration {
    /// One shared instance for every scope.
    Singleton(Connection),
    /// One instance per scope, created on first resolution.
    Scoped(Factory),
}

/// In-memory container.
///
/// Intended for tests, examples and small hosts that wire connections by hand.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    registrations: Arc<HashMap<ConnectionType, Registration>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory producing one `T` per scope.
    pub fn register_scoped<T, F>(mut self, factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let erased: Factory = Arc::new(move || Arc::new(factory()) as Connection);
        Arc::make_mut(&mut self.registrations).insert(ConnectionType::of::<T>(), Registration::Scoped(erased));
        self
    }

    /// Register one instance shared by every scope.
    pub fn register_singleton<T>(mut self, instance: Arc<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        Arc::make_mut(&mut self.registrations)
            .insert(ConnectionType::of::<T>(), Registration::Singleton(instance as Connection));
        self
    }

    pub fn contains(&self, connection_type: ConnectionType) -> bool {
        self.registrations.contains_key(&connection_type)
    }
}

impl core::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let names: Vec<&'static str> = self.registrations.keys().map(|t| t.name()).collect();
        f.debug_struct("ServiceRegistry").field("registrations", &names).finish()
    }
}

impl Container for ServiceRegistry {
    fn begin_child(&self) -> Result<Box<dyn ResourceScope>, ScopeError> {
        Ok(Box::new(RegistryScope {
            registrations: Arc::clone(&self.registrations),
            instances: Mutex::new(HashMap::new()),
        }))
    }
}

struct RegistryScope {
    registrations: Arc<HashMap<ConnectionType, Registration>>,
    instances: Mutex<HashMap<ConnectionType, Connection>>,
}

impl ResourceScope for RegistryScope {
    fn resolve(&self, connection_type: ConnectionType) -> Option<Connection> {
        match self.registrations.get(&connection_type)? {
            Registration::Singleton(instance) => Some(Arc::clone(instance)),
            Registration::Scoped(factory) => {
                let mut instances = self.instances.lock().ok()?;
                let instance = instances.entry(connection_type).or_insert_with(|| factory());
                Some(Arc::clone(instance))
            }
        }
    }

    fn dispose(&mut self) {
        if let Ok(mut instances) = self.instances.lock() {
            instances.clear();
        }
    }
}
